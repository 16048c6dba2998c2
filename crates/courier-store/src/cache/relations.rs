//! Relation slices held by the TTL cache.
//!
//! The cache holds a partial view of the relations: a slice exists only once
//! a caller seeded it with `set_*`.  Edges are mirrored into the other side
//! only when that side is seeded too, and seeding a slice withdraws its
//! owner from every seeded slice outside the new set.  The user→groups index is derived
//! from the cached membership slices and never outlives them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use courier_shared::{ContactSet, GroupId, GroupSet, MemberSet, UserId};

use super::entry::Cached;
use crate::error::{Result, StorageError, SystemError};

#[derive(Debug, Default)]
pub(crate) struct Relations {
    contacts: HashMap<UserId, Cached<ContactSet>>,
    members: HashMap<GroupId, Cached<MemberSet>>,
    memberships: HashMap<UserId, GroupSet>,
}

impl Relations {
    pub fn clear(&mut self) {
        self.contacts.clear();
        self.members.clear();
        self.memberships.clear();
    }

    pub fn len(&self) -> usize {
        self.contacts.len() + self.members.len()
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    pub fn set_contacts(&mut self, user: UserId, contacts: ContactSet) -> Result<()> {
        if contacts.contains(&user) {
            return Err(SystemError::IncorrectData.into());
        }
        if contacts.iter().any(UserId::is_nil) {
            return Err(SystemError::InvalidArgument.into());
        }

        // Any seeded slice outside the new set drops `user`, including ones
        // that listed it while `user` itself was not seeded.
        self.contacts.remove(&user);
        for (owner, slice) in self.contacts.iter_mut() {
            if !contacts.contains(owner) {
                slice.get_mut().remove(&user);
            }
        }
        for contact in &contacts {
            self.mirror_contact(contact, user);
        }
        self.contacts.insert(user, Cached::new(contacts));
        Ok(())
    }

    pub fn add_contact(&mut self, user: UserId, contact: UserId) -> Result<()> {
        if user == contact {
            return Err(SystemError::IncorrectData.into());
        }
        let slice = self
            .contacts
            .get_mut(&user)
            .ok_or(StorageError::UserContactRelationNotExists)?;
        if !slice.touch().insert(contact) {
            return Err(SystemError::AlreadyInContainer.into());
        }
        self.mirror_contact(&contact, user);
        Ok(())
    }

    pub fn remove_contact(&mut self, user: UserId, contact: UserId) -> Result<()> {
        let slice = self
            .contacts
            .get_mut(&user)
            .ok_or(StorageError::UserContactRelationNotExists)?;
        if !slice.touch().remove(&contact) {
            return Err(SystemError::NotInContainer.into());
        }
        self.unmirror_contact(&contact, &user);
        Ok(())
    }

    pub fn clear_contacts(&mut self, user: UserId) {
        let Some(slice) = self.contacts.get_mut(&user) else {
            return;
        };
        let former = std::mem::take(slice.touch());
        for contact in &former {
            self.unmirror_contact(contact, &user);
        }
    }

    pub fn contacts_of(&mut self, user: UserId) -> Result<ContactSet> {
        self.contacts
            .get_mut(&user)
            .map(|slice| slice.touch().clone())
            .ok_or_else(|| StorageError::UserContactRelationNotExists.into())
    }

    fn mirror_contact(&mut self, owner: &UserId, contact: UserId) {
        if let Some(slice) = self.contacts.get_mut(owner) {
            slice.get_mut().insert(contact);
        }
    }

    fn unmirror_contact(&mut self, owner: &UserId, contact: &UserId) {
        if let Some(slice) = self.contacts.get_mut(owner) {
            slice.get_mut().remove(contact);
        }
    }

    // -----------------------------------------------------------------------
    // Memberships
    // -----------------------------------------------------------------------

    pub fn set_members(&mut self, group: GroupId, users: MemberSet) -> Result<()> {
        if users.iter().any(UserId::is_nil) {
            return Err(SystemError::InvalidArgument.into());
        }
        if let Some(old) = self.members.remove(&group) {
            for user in old.get() {
                self.unindex(user, &group);
            }
        }
        for user in &users {
            self.index(*user, group);
        }
        self.members.insert(group, Cached::new(users));
        Ok(())
    }

    pub fn add_member(&mut self, group: GroupId, user: UserId) -> Result<()> {
        let slice = self
            .members
            .get_mut(&group)
            .ok_or(StorageError::GroupUserRelationNotExists)?;
        if !slice.touch().insert(user) {
            return Err(SystemError::AlreadyInContainer.into());
        }
        self.index(user, group);
        Ok(())
    }

    pub fn remove_member(&mut self, group: GroupId, user: UserId) -> Result<()> {
        let slice = self
            .members
            .get_mut(&group)
            .ok_or(StorageError::GroupUserRelationNotExists)?;
        if !slice.touch().remove(&user) {
            return Err(SystemError::NotInContainer.into());
        }
        self.unindex(&user, &group);
        Ok(())
    }

    pub fn clear_members(&mut self, group: GroupId) {
        let Some(slice) = self.members.get_mut(&group) else {
            return;
        };
        let former = std::mem::take(slice.touch());
        for user in &former {
            self.unindex(user, &group);
        }
    }

    pub fn members_of(&mut self, group: GroupId) -> Result<MemberSet> {
        self.members
            .get_mut(&group)
            .map(|slice| slice.touch().clone())
            .ok_or_else(|| StorageError::GroupUserRelationNotExists.into())
    }

    /// Groups of `user` as far as the cached slices know.  Every slice that
    /// contributed counts as used.
    pub fn groups_of(&mut self, user: UserId) -> Result<GroupSet> {
        let groups = self
            .memberships
            .get(&user)
            .cloned()
            .ok_or(StorageError::UserGroupsRelationNotExists)?;
        for group in &groups {
            if let Some(slice) = self.members.get_mut(group) {
                slice.touch();
            }
        }
        Ok(groups)
    }

    fn index(&mut self, user: UserId, group: GroupId) {
        self.memberships.entry(user).or_default().insert(group);
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
    // Expiration
    // -----------------------------------------------------------------------

    /// Drop every slice unused for longer than `ttl`.  Returns how many.
    pub fn evict_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let before = self.contacts.len();
        self.contacts.retain(|_, slice| !slice.is_expired(ttl, now));
        let mut removed = before - self.contacts.len();

        let expired: Vec<GroupId> = self
            .members
            .iter()
            .filter(|(_, slice)| slice.is_expired(ttl, now))
            .map(|(group, _)| *group)
            .collect();
        for group in expired {
            if let Some(slice) = self.members.remove(&group) {
                for user in slice.get() {
                    self.unindex(user, &group);
                }
                removed += 1;
            }
        }
        removed
    }
}
