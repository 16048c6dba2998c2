//! In-memory image of a JSON store with full integrity checks.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_shared::{
    ContactSet, Group, GroupId, GroupSet, MemberSet, Message, MessageId, MsgRange, User, UserId,
};

use crate::error::{Result, StorageError, SystemError};

#[derive(Debug, Default, Clone)]
pub(crate) struct JsonState {
    users: HashMap<UserId, User>,
    logins: HashMap<String, UserId>,
    groups: HashMap<GroupId, Group>,
    messages: HashMap<MessageId, Message>,
    /// Per-group message index ordered by creation time.
    timeline: HashMap<GroupId, BTreeSet<(DateTime<Utc>, MessageId)>>,
    contacts: HashMap<UserId, ContactSet>,
    members: HashMap<GroupId, MemberSet>,
    memberships: HashMap<UserId, GroupSet>,
}

impl JsonState {
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn contact_lists(&self) -> impl Iterator<Item = (&UserId, &ContactSet)> {
        self.contacts.iter().filter(|(_, set)| !set.is_empty())
    }

    pub fn member_lists(&self) -> impl Iterator<Item = (&GroupId, &MemberSet)> {
        self.members.iter().filter(|(_, set)| !set.is_empty())
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.users.len(), self.groups.len(), self.messages.len())
    }

    fn ensure_user(&self, id: &UserId) -> Result<()> {
        if !self.users.contains_key(id) {
            return Err(StorageError::UserNotExists.into());
        }
        Ok(())
    }

    fn ensure_group(&self, id: &GroupId) -> Result<()> {
        if !self.groups.contains_key(id) {
            return Err(StorageError::GroupNotExists.into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn add_user(&mut self, user: User) -> Result<()> {
        if user.login().is_empty() {
            return Err(SystemError::InvalidArgument.into());
        }
        if self.users.contains_key(&user.id()) {
            return Err(StorageError::UserAlreadyExists.into());
        }
        if self.logins.contains_key(user.login()) {
            return Err(StorageError::UserLoginAlreadyRegistered.into());
        }
        self.logins.insert(user.login().to_string(), user.id());
        self.users.insert(user.id(), user);
        Ok(())
    }

    pub fn update_user(&mut self, user: User) -> Result<()> {
        if user.login().is_empty() {
            return Err(SystemError::InvalidArgument.into());
        }
        let current = self
            .users
            .get(&user.id())
            .ok_or(StorageError::UserNotExists)?;
        if current.registration_date() != user.registration_date() {
            return Err(SystemError::IncorrectData.into());
        }
        if current.login() != user.login() {
            if self.logins.contains_key(user.login()) {
                return Err(StorageError::UserLoginAlreadyRegistered.into());
            }
            self.logins.remove(current.login());
            self.logins.insert(user.login().to_string(), user.id());
        }
        self.users.insert(user.id(), user);
        Ok(())
    }

    pub fn user(&self, id: &UserId) -> Result<User> {
        self.users
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::UserNotExists.into())
    }

    pub fn authenticate(&self, login: &str, password_hash: &[u8]) -> Result<User> {
        let id = self.logins.get(login).ok_or(StorageError::UserNotExists)?;
        let user = self.user(id)?;
        if user.password_hash() != password_hash {
            return Err(StorageError::UserPasswordIncorrect.into());
        }
        Ok(user)
    }

    /// Drops the user only.  Relation edges stay until the store is
    /// reloaded.
    pub fn remove_user(&mut self, id: &UserId) {
        if let Some(user) = self.users.remove(id) {
            self.logins.remove(user.login());
        }
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    pub fn set_contacts(&mut self, user: UserId, contacts: ContactSet) -> Result<()> {
        self.ensure_user(&user)?;
        if contacts.contains(&user) {
            return Err(SystemError::IncorrectData.into());
        }
        for contact in &contacts {
            self.ensure_user(contact)?;
        }

        for former in self.contacts.remove(&user).unwrap_or_default() {
            if let Some(set) = self.contacts.get_mut(&former) {
                set.remove(&user);
            }
        }
        for contact in &contacts {
            self.contacts.entry(*contact).or_default().insert(user);
        }
        self.contacts.insert(user, contacts);
        Ok(())
    }

    pub fn add_contact(&mut self, user: UserId, contact: UserId) -> Result<()> {
        self.ensure_user(&user)?;
        self.ensure_user(&contact)?;
        if user == contact {
            return Err(SystemError::IncorrectData.into());
        }
        if !self.contacts.entry(user).or_default().insert(contact) {
            return Err(StorageError::UserContactAlreadyExists.into());
        }
        self.contacts.entry(contact).or_default().insert(user);
        Ok(())
    }

    pub fn remove_contact(&mut self, user: UserId, contact: UserId) -> Result<()> {
        self.ensure_user(&user)?;
        self.ensure_user(&contact)?;
        let removed = self
            .contacts
            .get_mut(&user)
            .map_or(false, |set| set.remove(&contact));
        if !removed {
            return Err(StorageError::UserContactNotExists.into());
        }
        if let Some(set) = self.contacts.get_mut(&contact) {
            set.remove(&user);
        }
        Ok(())
    }

    pub fn clear_contacts(&mut self, user: UserId) -> Result<()> {
        self.set_contacts(user, ContactSet::new())
    }

    pub fn contacts_of(&self, user: &UserId) -> Result<ContactSet> {
        self.ensure_user(user)?;
        Ok(self.contacts.get(user).cloned().unwrap_or_default())
    }

    pub fn groups_of(&self, user: &UserId) -> Result<GroupSet> {
        self.ensure_user(user)?;
        Ok(self.memberships.get(user).cloned().unwrap_or_default())
    }

    /// Load-time edge insertion.  Returns `false` when an endpoint is gone.
    pub fn restore_contact(&mut self, user: UserId, contact: UserId) -> Result<bool> {
        if user == contact {
            return Err(StorageError::UserContactsCorrupted.into());
        }
        if !self.users.contains_key(&user) || !self.users.contains_key(&contact) {
            return Ok(false);
        }
        self.contacts.entry(user).or_default().insert(contact);
        self.contacts.entry(contact).or_default().insert(user);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub fn add_group(&mut self, group: Group) -> Result<()> {
        if self.groups.contains_key(&group.id()) {
            return Err(StorageError::GroupUUIDAlreadyRegistered.into());
        }
        self.groups.insert(group.id(), group);
        Ok(())
    }

    pub fn update_group(&mut self, group: Group) -> Result<()> {
        let current = self
            .groups
            .get_mut(&group.id())
            .ok_or(StorageError::GroupNotExists)?;
        if current.registration_date() != group.registration_date() {
            return Err(SystemError::IncorrectData.into());
        }
        *current = group;
        Ok(())
    }

    pub fn group(&self, id: &GroupId) -> Result<Group> {
        self.groups
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::GroupNotExists.into())
    }

    /// Drops the group and the messages it owns.  Membership edges stay
    /// until the store is reloaded.
    pub fn remove_group(&mut self, id: &GroupId) {
        if self.groups.remove(id).is_none() {
            return;
        }
        for (_, message) in self.timeline.remove(id).unwrap_or_default() {
            self.messages.remove(&message);
        }
    }

    pub fn set_members(&mut self, group: GroupId, users: MemberSet) -> Result<()> {
        self.ensure_group(&group)?;
        for user in &users {
            self.ensure_user(user)?;
        }

        for former in self.members.remove(&group).unwrap_or_default() {
            self.unindex(&former, &group);
        }
        for user in &users {
            self.memberships.entry(*user).or_default().insert(group);
        }
        self.members.insert(group, users);
        Ok(())
    }

    pub fn add_member(&mut self, group: GroupId, user: UserId) -> Result<()> {
        self.ensure_group(&group)?;
        self.ensure_user(&user)?;
        if !self.members.entry(group).or_default().insert(user) {
            return Err(StorageError::GroupUserRelationAlreadyExists.into());
        }
        self.memberships.entry(user).or_default().insert(group);
        Ok(())
    }

    pub fn remove_member(&mut self, group: GroupId, user: UserId) -> Result<()> {
        self.ensure_group(&group)?;
        self.ensure_user(&user)?;
        let removed = self
            .members
            .get_mut(&group)
            .map_or(false, |set| set.remove(&user));
        if !removed {
            return Err(StorageError::GroupUserRelationNotExists.into());
        }
        self.unindex(&user, &group);
        Ok(())
    }

    pub fn clear_members(&mut self, group: GroupId) -> Result<()> {
        self.set_members(group, MemberSet::new())
    }

    pub fn members_of(&self, group: &GroupId) -> Result<MemberSet> {
        self.ensure_group(group)?;
        Ok(self.members.get(group).cloned().unwrap_or_default())
    }

    /// Load-time membership insertion.  Returns `false` when an endpoint is
    /// gone.
    pub fn restore_member(&mut self, group: GroupId, user: UserId) -> bool {
        if !self.groups.contains_key(&group) || !self.users.contains_key(&user) {
            return false;
        }
        self.members.entry(group).or_default().insert(user);
        self.memberships.entry(user).or_default().insert(group);
        true
    }

    fn unindex(&mut self, user: &UserId, group: &GroupId) {
        if let Some(groups) = self.memberships.get_mut(user) {
            groups.remove(group);
            if groups.is_empty() {
                self.memberships.remove(user);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub fn add_message(&mut self, message: Message) -> Result<()> {
        if self.messages.contains_key(&message.id()) {
            return Err(StorageError::MessageAlreadyExists.into());
        }
        self.ensure_group(&message.group_id())?;
        self.timeline
            .entry(message.group_id())
            .or_default()
            .insert((message.create_time(), message.id()));
        self.messages.insert(message.id(), message);
        Ok(())
    }

    pub fn update_message(&mut self, message: Message) -> Result<()> {
        let current = self
            .messages
            .get_mut(&message.id())
            .ok_or(StorageError::MessageNotExists)?;
        if current.group_id() != message.group_id()
            || current.create_time() != message.create_time()
        {
            return Err(SystemError::IncorrectData.into());
        }
        *current = message;
        Ok(())
    }

    pub fn message(&self, id: &MessageId) -> Result<Message> {
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::MessageNotExists.into())
    }

    /// Messages of `group` inside `range`, oldest first.
    pub fn messages_in(&self, group: &GroupId, range: &MsgRange) -> Result<Vec<Message>> {
        self.ensure_group(group)?;
        let Some(timeline) = self.timeline.get(group) else {
            return Ok(Vec::new());
        };
        let low = (range.from, MessageId(Uuid::nil()));
        let high = (range.to, MessageId(Uuid::from_u128(u128::MAX)));
        Ok(timeline
            .range(low..=high)
            .filter_map(|(_, id)| self.messages.get(id).cloned())
            .collect())
    }

    pub fn remove_message(&mut self, id: &MessageId) {
        if let Some(message) = self.messages.remove(id) {
            if let Some(timeline) = self.timeline.get_mut(&message.group_id()) {
                timeline.remove(&(message.create_time(), message.id()));
            }
        }
    }
}
