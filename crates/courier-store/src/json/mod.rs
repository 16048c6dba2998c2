//! JSON file backend.
//!
//! The whole store lives in one file that is read on `open()` into an
//! in-memory image.  Mutations apply to the image; the file is rewritten on
//! `flush()`, on `close()`, and after every mutation when `flush_on_write`
//! is set.  Rendering happens under the state lock, file I/O does not.

mod format;
mod state;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use courier_shared::{
    ContactSet, GroupId, GroupSet, MemberSet, MessageId, MsgRange, SharedGroup, SharedMessage,
    SharedUser, UserId,
};

use self::state::JsonState;
use crate::config::JsonConfig;
use crate::error::{read_error, write_error, Result, StorageError, SystemError};
use crate::storage::{require, require_range, DataStorage};

pub use self::format::FORMAT_VERSION;

/// Open image plus a counter bumped by every mutation.
struct Image {
    data: JsonState,
    generation: u64,
}

pub struct JsonStorage {
    config: JsonConfig,
    image: Mutex<Option<Image>>,
    /// Generation of the last snapshot written to disk.  Held while writing.
    written: Mutex<Option<u64>>,
}

impl JsonStorage {
    pub fn new(config: JsonConfig) -> Self {
        Self {
            config,
            image: Mutex::new(None),
            written: Mutex::new(None),
        }
    }

    /// Store at `path` with default settings.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Write the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let (generation, text) = {
            let image = self.image.lock();
            let image = image.as_ref().ok_or(StorageError::NotOpen)?;
            (image.generation, format::render(&image.data)?)
        };
        self.persist(generation, &text, false)
    }

    fn read<T>(&self, f: impl FnOnce(&JsonState) -> Result<T>) -> Result<T> {
        let image = self.image.lock();
        let image = image.as_ref().ok_or(StorageError::NotOpen)?;
        f(&image.data)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut JsonState) -> Result<T>) -> Result<T> {
        let (out, snapshot) = {
            let mut image = self.image.lock();
            let image = image.as_mut().ok_or(StorageError::NotOpen)?;
            let out = f(&mut image.data)?;
            image.generation += 1;
            let snapshot = if self.config.flush_on_write {
                Some((image.generation, format::render(&image.data)?))
            } else {
                None
            };
            (out, snapshot)
        };
        if let Some((generation, text)) = snapshot {
            // The image keeps the change; the next flush or close writes it.
            if let Err(e) = self.persist(generation, &text, false) {
                warn!(
                    path = %self.config.path.display(),
                    generation,
                    error = %e,
                    "Write-through failed, change kept in memory"
                );
            }
        }
        Ok(out)
    }

    /// Write a rendered snapshot unless a newer one already reached disk.
    fn persist(&self, generation: u64, text: &str, force: bool) -> Result<()> {
        let mut written = self.written.lock();
        if !force && written.map_or(false, |last| last >= generation) {
            return Ok(());
        }
        write_atomic(&self.config.path, text)?;
        *written = Some(generation);
        debug!(path = %self.config.path.display(), generation, "Wrote JSON storage");
        Ok(())
    }

    fn load(&self) -> Result<JsonState> {
        let path = &self.config.path;
        if path.exists() {
            if !path.is_file() {
                return Err(SystemError::ObjectNotFile.into());
            }
            let text = fs::read_to_string(path).map_err(|e| read_error(&e))?;
            let loaded = format::parse(&text)?;
            if loaded.pruned > 0 {
                warn!(
                    path = %path.display(),
                    pruned = loaded.pruned,
                    "Dropped relation edges pointing at removed entities"
                );
            }
            return Ok(loaded.state);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|_| SystemError::OpenFileFail)?;
        }
        let data = JsonState::default();
        write_atomic(path, &format::render(&data)?).map_err(|_| SystemError::OpenFileFail)?;
        info!(path = %path.display(), "Created empty JSON storage");
        Ok(data)
    }
}

/// Write to a sibling temporary file, sync it, then rename it over `path`.
fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .ok_or(SystemError::ObjectNotFile)?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp).map_err(|e| write_error(&e))?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&tmp);
            write_error(&e)
        })?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        write_error(&e)
    })
}

impl Drop for JsonStorage {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!(path = %self.config.path.display(), error = %e, "Failed to flush JSON storage on drop");
            }
        }
    }
}

impl DataStorage for JsonStorage {
    fn open(&self) -> Result<()> {
        if self.is_open() {
            self.close()?;
        }

        let data = self.load()?;
        let (users, groups, messages) = data.counts();
        info!(
            path = %self.config.path.display(),
            users,
            groups,
            messages,
            "Opened JSON storage"
        );

        *self.written.lock() = None;
        *self.image.lock() = Some(Image {
            data,
            generation: 0,
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let Some(image) = self.image.lock().take() else {
            return Ok(());
        };
        let written = format::render(&image.data)
            .and_then(|text| self.persist(image.generation, &text, true));
        if let Err(e) = written {
            // Keep the data so the caller can retry.
            *self.image.lock() = Some(image);
            return Err(e);
        }
        info!(path = %self.config.path.display(), "Closed JSON storage");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.image.lock().is_some()
    }

    // -- users --------------------------------------------------------------

    fn add_user(&self, user: &SharedUser) -> Result<()> {
        let user = user.read().clone();
        require(&user.id())?;
        self.mutate(|data| data.add_user(user))
    }

    fn update_user(&self, user: &SharedUser) -> Result<()> {
        let user = user.read().clone();
        require(&user.id())?;
        self.mutate(|data| data.update_user(user))
    }

    fn find_user_by_uuid(&self, id: &UserId) -> Result<SharedUser> {
        require(id)?;
        self.read(|data| data.user(id)).map(|u| u.share())
    }

    fn find_user_by_authentication(
        &self,
        login: &str,
        password_hash: &[u8],
    ) -> Result<SharedUser> {
        if login.is_empty() {
            return Err(SystemError::InvalidArgument.into());
        }
        self.read(|data| data.authenticate(login, password_hash))
            .map(|u| u.share())
    }

    fn remove_user(&self, id: &UserId) -> Result<()> {
        require(id)?;
        self.mutate(|data| {
            data.remove_user(id);
            Ok(())
        })
    }

    fn set_user_contacts(&self, user: &UserId, contacts: ContactSet) -> Result<()> {
        require(user)?;
        self.mutate(|data| data.set_contacts(*user, contacts))
    }

    fn add_user_contact(&self, user: &UserId, contact: &UserId) -> Result<()> {
        require(user)?;
        require(contact)?;
        self.mutate(|data| data.add_contact(*user, *contact))
    }

    fn remove_user_contact(&self, user: &UserId, contact: &UserId) -> Result<()> {
        require(user)?;
        require(contact)?;
        self.mutate(|data| data.remove_contact(*user, *contact))
    }

    fn clear_user_contacts(&self, user: &UserId) -> Result<()> {
        require(user)?;
        self.mutate(|data| data.clear_contacts(*user))
    }

    fn get_user_contact_list(&self, user: &UserId) -> Result<ContactSet> {
        require(user)?;
        self.read(|data| data.contacts_of(user))
    }

    fn get_user_groups(&self, user: &UserId) -> Result<GroupSet> {
        require(user)?;
        self.read(|data| data.groups_of(user))
    }

    // -- groups -------------------------------------------------------------

    fn add_group(&self, group: &SharedGroup) -> Result<()> {
        let group = group.read().clone();
        require(&group.id())?;
        self.mutate(|data| data.add_group(group))
    }

    fn update_group(&self, group: &SharedGroup) -> Result<()> {
        let group = group.read().clone();
        require(&group.id())?;
        self.mutate(|data| data.update_group(group))
    }

    fn find_group_by_uuid(&self, id: &GroupId) -> Result<SharedGroup> {
        require(id)?;
        self.read(|data| data.group(id)).map(|g| g.share())
    }

    fn remove_group(&self, id: &GroupId) -> Result<()> {
        require(id)?;
        self.mutate(|data| {
            data.remove_group(id);
            Ok(())
        })
    }

    fn set_group_users(&self, group: &GroupId, users: MemberSet) -> Result<()> {
        require(group)?;
        self.mutate(|data| data.set_members(*group, users))
    }

    fn add_group_user(&self, group: &GroupId, user: &UserId) -> Result<()> {
        require(group)?;
        require(user)?;
        self.mutate(|data| data.add_member(*group, *user))
    }

    fn remove_group_user(&self, group: &GroupId, user: &UserId) -> Result<()> {
        require(group)?;
        require(user)?;
        self.mutate(|data| data.remove_member(*group, *user))
    }

    fn clear_group_users(&self, group: &GroupId) -> Result<()> {
        require(group)?;
        self.mutate(|data| data.clear_members(*group))
    }

    fn get_group_user_list(&self, group: &GroupId) -> Result<MemberSet> {
        require(group)?;
        self.read(|data| data.members_of(group))
    }

    // -- messages -----------------------------------------------------------

    fn add_message(&self, message: &SharedMessage) -> Result<()> {
        let message = message.read().clone();
        require(&message.id())?;
        self.mutate(|data| data.add_message(message))
    }

    fn update_message(&self, message: &SharedMessage) -> Result<()> {
        let message = message.read().clone();
        require(&message.id())?;
        self.mutate(|data| data.update_message(message))
    }

    fn find_message(&self, id: &MessageId) -> Result<SharedMessage> {
        require(id)?;
        self.read(|data| data.message(id)).map(|m| m.share())
    }

    fn find_messages(&self, group: &GroupId, range: &MsgRange) -> Result<Vec<SharedMessage>> {
        require(group)?;
        require_range(range)?;
        let found = self.read(|data| data.messages_in(group, range))?;
        Ok(found.into_iter().map(|m| m.share()).collect())
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        require(id)?;
        self.mutate(|data| {
            data.remove_message(id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, Utc};
    use courier_shared::{
        hash_password, Group, Message, MessageData, MessageType, Sex, User,
    };

    use super::*;
    use crate::test_support::init_tracing;

    fn open_at(path: &Path) -> JsonStorage {
        init_tracing();
        let storage = JsonStorage::at(path);
        storage.open().unwrap();
        storage
    }

    fn add_user(storage: &JsonStorage, login: &str) -> UserId {
        let mut user = User::new(UserId::new(), login);
        user.set_password(login).unwrap();
        let id = user.id();
        storage.add_user(&user.share()).unwrap();
        id
    }

    fn add_group(storage: &JsonStorage, name: &str) -> GroupId {
        let mut group = Group::new(GroupId::new());
        group.set_name(name);
        let id = group.id();
        storage.add_group(&group.share()).unwrap();
        id
    }

    #[test]
    fn missing_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let storage = open_at(&path);

        assert!(storage.is_open());
        assert!(path.is_file());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains(FORMAT_VERSION));
        storage.close().unwrap();
        assert!(!storage.is_open());
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::at(dir.path());
        assert_eq!(storage.open().unwrap_err(), SystemError::ObjectNotFile);
        assert!(!storage.is_open());
    }

    #[test]
    fn corrupted_file_leaves_storage_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ \"VERSION\": ").unwrap();

        let storage = JsonStorage::at(&path);
        assert_eq!(storage.open().unwrap_err(), SystemError::ReadFileFail);
        assert!(!storage.is_open());
    }

    #[test]
    fn closed_storage_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::at(dir.path().join("s.json"));

        assert_eq!(
            storage.find_user_by_uuid(&UserId::new()).unwrap_err(),
            StorageError::NotOpen
        );
        assert_eq!(
            storage
                .add_group(&Group::new(GroupId::new()).share())
                .unwrap_err(),
            StorageError::NotOpen
        );
        assert_eq!(storage.flush().unwrap_err(), StorageError::NotOpen);
        storage.close().unwrap();
    }

    #[test]
    fn round_trip_reproduces_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let storage = open_at(&path);

        let mut owner = User::new(UserId::new(), "owner");
        owner.set_password("owner-pw").unwrap();
        owner.set_name("Owner");
        owner.set_sex(Sex::Male);
        owner.set_birthday(NaiveDate::from_ymd_opt(1985, 7, 3));
        let owner_id = owner.id();
        storage.add_user(&owner.clone().share()).unwrap();

        let friends: ContactSet = (0..5)
            .map(|i| add_user(&storage, &format!("friend{i}")))
            .collect();
        storage.set_user_contacts(&owner_id, friends.clone()).unwrap();

        let group_id = add_group(&storage, "friends");
        storage.set_group_users(&group_id, friends.clone()).unwrap();

        let start = Utc::now();
        let mut messages = Vec::new();
        for i in 0..5 {
            let mut message = Message::with_create_time(
                MessageId::new(),
                group_id,
                start + Duration::milliseconds(i * 10),
            );
            let kind = if i % 2 == 0 { MessageType::Text } else { MessageType::Image };
            message
                .set_data(MessageData::new(kind, vec![i as u8, 0xff, 0x00]))
                .unwrap();
            storage.add_message(&message.clone().share()).unwrap();
            messages.push(message);
        }
        storage.close().unwrap();

        let reopened = open_at(&path);
        let found = reopened.find_user_by_uuid(&owner_id).unwrap();
        assert_eq!(*found.read(), owner);
        assert_eq!(reopened.get_user_contact_list(&owner_id).unwrap(), friends);
        for friend in &friends {
            assert_eq!(
                reopened.get_user_contact_list(friend).unwrap(),
                ContactSet::from([owner_id])
            );
            assert_eq!(
                reopened.get_user_groups(friend).unwrap(),
                GroupSet::from([group_id])
            );
        }

        let members = reopened.get_group_user_list(&group_id).unwrap();
        assert_eq!(members.len(), 5);
        assert_eq!(members, friends);
        assert_eq!(
            reopened.find_group_by_uuid(&group_id).unwrap().read().name(),
            "friends"
        );

        for original in &messages {
            let found = reopened.find_message(&original.id()).unwrap();
            let found = found.read();
            assert_eq!(found.data(), original.data());
            assert_eq!(found.create_time(), original.create_time());
            assert_eq!(found.group_id(), group_id);
        }
    }

    #[test]
    fn logins_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let first = add_user(&storage, "taken");

        let second = User::new(UserId::new(), "taken").share();
        assert_eq!(
            storage.add_user(&second).unwrap_err(),
            StorageError::UserLoginAlreadyRegistered
        );

        let twin = User::new(first, "other").share();
        assert_eq!(
            storage.add_user(&twin).unwrap_err(),
            StorageError::UserAlreadyExists
        );
        // Rejected adds leave the store untouched.
        assert_eq!(
            storage.find_user_by_uuid(&first).unwrap().read().login(),
            "taken"
        );
        assert_eq!(
            storage
                .find_user_by_authentication("other", &[])
                .unwrap_err(),
            StorageError::UserNotExists
        );
    }

    #[test]
    fn authentication_checks_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let id = add_user(&storage, "grace");

        let found = storage
            .find_user_by_authentication("grace", &hash_password("grace"))
            .unwrap();
        assert_eq!(found.read().id(), id);
        assert_eq!(
            storage
                .find_user_by_authentication("grace", &hash_password("wrong"))
                .unwrap_err(),
            StorageError::UserPasswordIncorrect
        );
    }

    #[test]
    fn lookups_return_copies_and_update_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let id = add_user(&storage, "heidi");

        let a = storage.find_user_by_uuid(&id).unwrap();
        let b = storage.find_user_by_uuid(&id).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        a.write().set_name("Heidi");
        assert_eq!(storage.find_user_by_uuid(&id).unwrap().read().name(), "");
        storage.update_user(&a).unwrap();
        assert_eq!(
            storage.find_user_by_uuid(&id).unwrap().read().name(),
            "Heidi"
        );

        let ghost = User::new(UserId::new(), "ghost").share();
        assert_eq!(
            storage.update_user(&ghost).unwrap_err(),
            StorageError::UserNotExists
        );
        let ghost_group = Group::new(GroupId::new()).share();
        assert_eq!(
            storage.update_group(&ghost_group).unwrap_err(),
            StorageError::GroupNotExists
        );
    }

    #[test]
    fn group_and_message_uniqueness() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let group = Group::new(GroupId::new()).share();
        storage.add_group(&group).unwrap();
        assert_eq!(
            storage.add_group(&group).unwrap_err(),
            StorageError::GroupUUIDAlreadyRegistered
        );

        let message = Message::new(MessageId::new(), group.read().id()).share();
        storage.add_message(&message).unwrap();
        assert_eq!(
            storage.add_message(&message).unwrap_err(),
            StorageError::MessageAlreadyExists
        );

        let orphan = Message::new(MessageId::new(), GroupId::new()).share();
        assert_eq!(
            storage.add_message(&orphan).unwrap_err(),
            StorageError::GroupNotExists
        );
        assert_eq!(
            storage.update_message(&orphan).unwrap_err(),
            StorageError::MessageNotExists
        );
        assert_eq!(
            storage.find_message(&orphan.read().id()).unwrap_err(),
            StorageError::MessageNotExists
        );
    }

    #[test]
    fn message_owner_and_time_cannot_change() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let group = add_group(&storage, "g");
        let message = Message::new(MessageId::new(), group);
        storage.add_message(&message.clone().share()).unwrap();

        let moved = Message::with_create_time(
            message.id(),
            group,
            message.create_time() + Duration::seconds(1),
        );
        assert_eq!(
            storage.update_message(&moved.share()).unwrap_err(),
            SystemError::IncorrectData
        );

        let mut edited = message.clone();
        edited.set_data(MessageData::text("edited")).unwrap();
        storage.update_message(&edited.share()).unwrap();
        assert_eq!(
            storage.find_message(&message.id()).unwrap().read().data().bytes,
            b"edited"
        );
    }

    #[test]
    fn range_query_is_inclusive_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let group = add_group(&storage, "timeline");
        let other = add_group(&storage, "noise");

        let t0 = Utc::now();
        let times: Vec<_> = (0..5).map(|i| t0 + Duration::seconds(i)).collect();
        let mut ids = Vec::new();
        // Insert out of order; the query must still come back sorted.
        for &i in &[3usize, 0, 4, 1, 2] {
            let message = Message::with_create_time(MessageId::new(), group, times[i]);
            ids.push((i, message.id()));
            storage.add_message(&message.share()).unwrap();
        }
        storage
            .add_message(&Message::with_create_time(MessageId::new(), other, times[1]).share())
            .unwrap();
        ids.sort();

        let found = storage
            .find_messages(&group, &MsgRange::new(times[0], times[3]))
            .unwrap();
        let found_ids: Vec<MessageId> = found.iter().map(|m| m.read().id()).collect();
        let expected: Vec<MessageId> = ids[..4].iter().map(|(_, id)| *id).collect();
        assert_eq!(found_ids, expected);

        let empty = storage
            .find_messages(&group, &MsgRange::new(t0 - Duration::days(2), t0 - Duration::days(1)))
            .unwrap();
        assert!(empty.is_empty());

        assert_eq!(
            storage
                .find_messages(&group, &MsgRange::new(times[3], times[0]))
                .unwrap_err(),
            SystemError::InvalidArgument
        );
        assert_eq!(
            storage
                .find_messages(&GroupId::new(), &MsgRange::new(times[0], times[3]))
                .unwrap_err(),
            StorageError::GroupNotExists
        );
    }

    #[test]
    fn contact_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let a = add_user(&storage, "a");
        let b = add_user(&storage, "b");

        assert_eq!(
            storage.add_user_contact(&a, &a).unwrap_err(),
            SystemError::IncorrectData
        );
        assert_eq!(
            storage.add_user_contact(&a, &UserId::new()).unwrap_err(),
            StorageError::UserNotExists
        );

        storage.add_user_contact(&a, &b).unwrap();
        assert!(storage.get_user_contact_list(&b).unwrap().contains(&a));
        assert_eq!(
            storage.add_user_contact(&b, &a).unwrap_err(),
            StorageError::UserContactAlreadyExists
        );

        storage.remove_user_contact(&b, &a).unwrap();
        assert!(storage.get_user_contact_list(&a).unwrap().is_empty());
        assert_eq!(
            storage.remove_user_contact(&a, &b).unwrap_err(),
            StorageError::UserContactNotExists
        );

        storage
            .set_user_contacts(&a, ContactSet::from([b]))
            .unwrap();
        storage.clear_user_contacts(&b).unwrap();
        assert!(storage.get_user_contact_list(&a).unwrap().is_empty());
        assert_eq!(
            storage.clear_user_contacts(&UserId::new()).unwrap_err(),
            StorageError::UserNotExists
        );
    }

    #[test]
    fn membership_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let g = add_group(&storage, "g");
        let u = add_user(&storage, "u");

        assert!(storage.get_user_groups(&u).unwrap().is_empty());
        assert!(storage.get_group_user_list(&g).unwrap().is_empty());

        storage.add_group_user(&g, &u).unwrap();
        assert!(storage.get_group_user_list(&g).unwrap().contains(&u));
        assert!(storage.get_user_groups(&u).unwrap().contains(&g));
        assert_eq!(
            storage.add_group_user(&g, &u).unwrap_err(),
            StorageError::GroupUserRelationAlreadyExists
        );

        storage.remove_group_user(&g, &u).unwrap();
        assert!(!storage.get_group_user_list(&g).unwrap().contains(&u));
        assert!(!storage.get_user_groups(&u).unwrap().contains(&g));
        assert_eq!(
            storage.remove_group_user(&g, &u).unwrap_err(),
            StorageError::GroupUserRelationNotExists
        );

        assert_eq!(
            storage.add_group_user(&GroupId::new(), &u).unwrap_err(),
            StorageError::GroupNotExists
        );
        assert_eq!(
            storage.add_group_user(&g, &UserId::new()).unwrap_err(),
            StorageError::UserNotExists
        );
        assert_eq!(
            storage
                .set_group_users(&g, MemberSet::from([u, UserId::new()]))
                .unwrap_err(),
            StorageError::UserNotExists
        );
        assert_eq!(
            storage.clear_group_users(&GroupId::new()).unwrap_err(),
            StorageError::GroupNotExists
        );
        assert_eq!(
            storage.get_user_groups(&UserId::new()).unwrap_err(),
            StorageError::UserNotExists
        );
    }

    #[test]
    fn set_group_users_rebuilds_reverse_index() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let g = add_group(&storage, "g");
        let (u, v, w) = (
            add_user(&storage, "u"),
            add_user(&storage, "v"),
            add_user(&storage, "w"),
        );

        storage.set_group_users(&g, MemberSet::from([u, v])).unwrap();
        storage.set_group_users(&g, MemberSet::from([v, w])).unwrap();
        assert!(storage.get_user_groups(&u).unwrap().is_empty());
        assert!(storage.get_user_groups(&v).unwrap().contains(&g));
        assert!(storage.get_user_groups(&w).unwrap().contains(&g));

        storage.clear_group_users(&g).unwrap();
        assert!(storage.get_user_groups(&v).unwrap().is_empty());
    }

    #[test]
    fn deletes_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let u = add_user(&storage, "u");

        storage.remove_user(&u).unwrap();
        storage.remove_user(&u).unwrap();
        storage.remove_group(&GroupId::new()).unwrap();
        storage.remove_message(&MessageId::new()).unwrap();
        assert_eq!(
            storage.find_user_by_uuid(&u).unwrap_err(),
            StorageError::UserNotExists
        );
    }

    // Removing an entity does not cascade into relations; the edges survive
    // in memory and are dropped when the file is next opened.
    #[test]
    fn removal_does_not_cascade_until_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = open_at(&path);
        let g = add_group(&storage, "g");
        let (a, b) = (add_user(&storage, "a"), add_user(&storage, "b"));
        storage.add_user_contact(&a, &b).unwrap();
        storage.add_group_user(&g, &b).unwrap();

        storage.remove_user(&b).unwrap();
        assert!(storage.get_user_contact_list(&a).unwrap().contains(&b));
        assert!(storage.get_group_user_list(&g).unwrap().contains(&b));
        storage.close().unwrap();

        let reopened = open_at(&path);
        assert!(reopened.get_user_contact_list(&a).unwrap().is_empty());
        assert!(reopened.get_group_user_list(&g).unwrap().is_empty());
    }

    #[test]
    fn removing_a_group_removes_its_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = open_at(&path);
        let g = add_group(&storage, "g");
        let message = Message::new(MessageId::new(), g).share();
        storage.add_message(&message).unwrap();

        storage.remove_group(&g).unwrap();
        assert_eq!(
            storage.find_message(&message.read().id()).unwrap_err(),
            StorageError::MessageNotExists
        );
        storage.close().unwrap();
        open_at(&path).close().unwrap();
    }

    #[test]
    fn flush_on_write_persists_each_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut config = JsonConfig::new(&path);
        config.flush_on_write = true;
        let storage = JsonStorage::new(config);
        storage.open().unwrap();
        let id = add_user(&storage, "eager");

        // A second instance sees the user without the first being closed.
        let reader = open_at(&path);
        assert!(reader.find_user_by_uuid(&id).is_ok());
        reader.close().unwrap();
        storage.close().unwrap();
    }

    #[test]
    fn failed_write_through_keeps_the_change() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let path = data_dir.join("s.json");
        let mut config = JsonConfig::new(&path);
        config.flush_on_write = true;
        let storage = JsonStorage::new(config);
        storage.open().unwrap();
        fs::remove_dir_all(&data_dir).unwrap();

        let user = User::new(UserId::new(), "kept");
        let id = user.id();
        let user = user.share();
        storage.add_user(&user).unwrap();
        assert!(storage.find_user_by_uuid(&id).is_ok());
        assert_eq!(
            storage.add_user(&user).unwrap_err(),
            StorageError::UserAlreadyExists
        );
        assert_eq!(storage.flush().unwrap_err(), SystemError::DirNotExists);

        fs::create_dir_all(&data_dir).unwrap();
        storage.close().unwrap();
        let reopened = open_at(&path);
        assert_eq!(
            reopened.find_user_by_uuid(&id).unwrap().read().login(),
            "kept"
        );
    }

    #[test]
    fn atomic_write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = open_at(&path);
        add_user(&storage, "synced");
        storage.flush().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("s.json")]);
    }

    #[test]
    fn empty_login_never_reaches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let storage = open_at(&path);
        assert_eq!(
            storage
                .add_user(&User::new(UserId::new(), "").share())
                .unwrap_err(),
            SystemError::InvalidArgument
        );

        let id = add_user(&storage, "named");
        let found = storage.find_user_by_uuid(&id).unwrap();
        found.write().set_login("");
        assert_eq!(
            storage.update_user(&found).unwrap_err(),
            SystemError::InvalidArgument
        );
        storage.close().unwrap();

        let reopened = open_at(&path);
        assert_eq!(
            reopened.find_user_by_uuid(&id).unwrap().read().login(),
            "named"
        );
    }

    #[test]
    fn drop_flushes_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let id = {
            let storage = open_at(&path);
            add_user(&storage, "dropped")
        };
        let reopened = open_at(&path);
        assert!(reopened.find_user_by_uuid(&id).is_ok());
    }

    #[test]
    fn reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        let id = add_user(&storage, "again");
        storage.open().unwrap();
        assert!(storage.find_user_by_uuid(&id).is_ok());
    }

    #[test]
    fn nil_identifiers_are_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_at(&dir.path().join("s.json"));
        assert_eq!(
            storage
                .add_user(&User::new(UserId::nil(), "nil").share())
                .unwrap_err(),
            SystemError::InvalidArgument
        );
        assert_eq!(
            storage.remove_message(&MessageId::nil()).unwrap_err(),
            SystemError::InvalidArgument
        );
        assert_eq!(
            storage.find_user_by_authentication("", &[]).unwrap_err(),
            SystemError::InvalidArgument
        );
    }

    #[test]
    fn concurrent_writers_keep_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(open_at(&dir.path().join("s.json")));
        let g = add_group(&storage, "crowd");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    let id = add_user(&storage, &format!("member{i}"));
                    storage.add_group_user(&g, &id).unwrap();
                    id
                })
            })
            .collect();
        let ids: HashSet<UserId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(storage.get_group_user_list(&g).unwrap(), ids);
        storage.flush().unwrap();
    }
}
