//! In-memory TTL cache backend.
//!
//! Entities are kept as the caller's own shared handles, so a lookup returns
//! the very object that was added and `update_*` only checks that the handle
//! is the cached one.  Every `find*` refreshes the entry's last-access time;
//! a background sweeper evicts entries left untouched for longer than the
//! configured TTL.
//!
//! Messages are never cached: adds, updates and removals are accepted and
//! dropped, lookups always miss.

mod entry;
mod relations;
mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use courier_shared::{
    ContactSet, GroupId, GroupSet, MemberSet, MessageId, MsgRange, SharedGroup, SharedMessage,
    SharedUser, UserId,
};

use self::entry::Cached;
use self::relations::Relations;
use self::sweeper::Sweeper;
use crate::config::CacheConfig;
use crate::error::{Result, StorageError, SystemError};
use crate::storage::{require, require_range, DataStorage};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Collections shared between callers and the sweeper thread, one lock each.
#[derive(Debug, Default)]
struct CacheState {
    users: Mutex<HashMap<UserId, Cached<SharedUser>>>,
    groups: Mutex<HashMap<GroupId, Cached<SharedGroup>>>,
    relations: Mutex<Relations>,
}

impl CacheState {
    fn clear(&self) {
        self.users.lock().clear();
        self.groups.lock().clear();
        self.relations.lock().clear();
    }

    /// One eviction pass.
    fn sweep(&self, ttl: Duration) {
        let now = Instant::now();

        let users = {
            let mut users = self.users.lock();
            let before = users.len();
            users.retain(|_, entry| !entry.is_expired(ttl, now));
            before - users.len()
        };
        let groups = {
            let mut groups = self.groups.lock();
            let before = groups.len();
            groups.retain(|_, entry| !entry.is_expired(ttl, now));
            before - groups.len()
        };
        let relations = self.relations.lock().evict_expired(ttl, now);

        if users + groups + relations > 0 {
            debug!(users, groups, relations, "Evicted expired cache entries");
        }
    }
}

// ---------------------------------------------------------------------------
// Cached storage
// ---------------------------------------------------------------------------

pub struct CachedStorage {
    config: CacheConfig,
    state: Arc<CacheState>,
    sweeper: Sweeper,
}

impl CachedStorage {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Arc::new(CacheState::default()),
            sweeper: Sweeper::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of cached users, groups and relation slices.
    pub fn len(&self) -> usize {
        self.state.users.lock().len()
            + self.state.groups.lock().len()
            + self.state.relations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CachedStorage {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl Drop for CachedStorage {
    fn drop(&mut self) {
        self.sweeper.stop();
    }
}

impl DataStorage for CachedStorage {
    fn open(&self) -> Result<()> {
        self.state.clear();

        let state = Arc::clone(&self.state);
        let ttl = self.config.ttl;
        if self
            .sweeper
            .start(self.config.sweep_interval, move || state.sweep(ttl))?
        {
            info!(
                ttl_secs = self.config.ttl.as_secs(),
                sweep_ms = self.config.sweep_interval.as_millis() as u64,
                "Opened cache storage"
            );
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let was_open = self.sweeper.is_running();
        self.sweeper.stop();
        self.state.clear();
        if was_open {
            info!("Closed cache storage");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.sweeper.is_running()
    }

    // -- users --------------------------------------------------------------

    fn add_user(&self, user: &SharedUser) -> Result<()> {
        let id = user.read().id();
        require(&id)?;

        let mut users = self.state.users.lock();
        if users.contains_key(&id) {
            return Err(StorageError::UserAlreadyExists.into());
        }
        users.insert(id, Cached::new(Arc::clone(user)));
        Ok(())
    }

    fn update_user(&self, user: &SharedUser) -> Result<()> {
        let id = user.read().id();
        require(&id)?;

        let mut users = self.state.users.lock();
        let entry = users.get_mut(&id).ok_or(StorageError::UserNotExists)?;
        if !Arc::ptr_eq(entry.get(), user) {
            return Err(SystemError::IncorrectData.into());
        }
        entry.touch();
        Ok(())
    }

    fn find_user_by_uuid(&self, id: &UserId) -> Result<SharedUser> {
        require(id)?;
        self.state
            .users
            .lock()
            .get_mut(id)
            .map(|entry| Arc::clone(entry.touch()))
            .ok_or_else(|| StorageError::UserNotExists.into())
    }

    fn find_user_by_authentication(
        &self,
        login: &str,
        password_hash: &[u8],
    ) -> Result<SharedUser> {
        if login.is_empty() {
            return Err(SystemError::InvalidArgument.into());
        }
        let mut users = self.state.users.lock();
        let entry = users
            .values_mut()
            .find(|entry| {
                let user = entry.get().read();
                user.login() == login && user.password_hash() == password_hash
            })
            .ok_or(StorageError::UserNotExists)?;
        Ok(Arc::clone(entry.touch()))
    }

    fn remove_user(&self, id: &UserId) -> Result<()> {
        require(id)?;
        self.state.users.lock().remove(id);
        Ok(())
    }

    fn set_user_contacts(&self, user: &UserId, contacts: ContactSet) -> Result<()> {
        require(user)?;
        self.state.relations.lock().set_contacts(*user, contacts)
    }

    fn add_user_contact(&self, user: &UserId, contact: &UserId) -> Result<()> {
        require(user)?;
        require(contact)?;
        self.state.relations.lock().add_contact(*user, *contact)
    }

    fn remove_user_contact(&self, user: &UserId, contact: &UserId) -> Result<()> {
        require(user)?;
        require(contact)?;
        self.state.relations.lock().remove_contact(*user, *contact)
    }

    fn clear_user_contacts(&self, user: &UserId) -> Result<()> {
        require(user)?;
        self.state.relations.lock().clear_contacts(*user);
        Ok(())
    }

    fn get_user_contact_list(&self, user: &UserId) -> Result<ContactSet> {
        require(user)?;
        self.state.relations.lock().contacts_of(*user)
    }

    fn get_user_groups(&self, user: &UserId) -> Result<GroupSet> {
        require(user)?;
        self.state.relations.lock().groups_of(*user)
    }

    // -- groups -------------------------------------------------------------

    fn add_group(&self, group: &SharedGroup) -> Result<()> {
        let id = group.read().id();
        require(&id)?;

        let mut groups = self.state.groups.lock();
        if groups.contains_key(&id) {
            return Err(StorageError::GroupAlreadyExists.into());
        }
        groups.insert(id, Cached::new(Arc::clone(group)));
        Ok(())
    }

    fn update_group(&self, group: &SharedGroup) -> Result<()> {
        let id = group.read().id();
        require(&id)?;

        let mut groups = self.state.groups.lock();
        let entry = groups.get_mut(&id).ok_or(StorageError::GroupNotExists)?;
        if !Arc::ptr_eq(entry.get(), group) {
            return Err(SystemError::IncorrectData.into());
        }
        entry.touch();
        Ok(())
    }

    fn find_group_by_uuid(&self, id: &GroupId) -> Result<SharedGroup> {
        require(id)?;
        self.state
            .groups
            .lock()
            .get_mut(id)
            .map(|entry| Arc::clone(entry.touch()))
            .ok_or_else(|| StorageError::GroupNotExists.into())
    }

    fn remove_group(&self, id: &GroupId) -> Result<()> {
        require(id)?;
        self.state.groups.lock().remove(id);
        Ok(())
    }

    fn set_group_users(&self, group: &GroupId, users: MemberSet) -> Result<()> {
        require(group)?;
        self.state.relations.lock().set_members(*group, users)
    }

    fn add_group_user(&self, group: &GroupId, user: &UserId) -> Result<()> {
        require(group)?;
        require(user)?;
        self.state.relations.lock().add_member(*group, *user)
    }

    fn remove_group_user(&self, group: &GroupId, user: &UserId) -> Result<()> {
        require(group)?;
        require(user)?;
        self.state.relations.lock().remove_member(*group, *user)
    }

    fn clear_group_users(&self, group: &GroupId) -> Result<()> {
        require(group)?;
        self.state.relations.lock().clear_members(*group);
        Ok(())
    }

    fn get_group_user_list(&self, group: &GroupId) -> Result<MemberSet> {
        require(group)?;
        self.state.relations.lock().members_of(*group)
    }

    // -- messages -----------------------------------------------------------

    fn add_message(&self, message: &SharedMessage) -> Result<()> {
        require(&message.read().id())
    }

    fn update_message(&self, message: &SharedMessage) -> Result<()> {
        require(&message.read().id())
    }

    fn find_message(&self, id: &MessageId) -> Result<SharedMessage> {
        require(id)?;
        Err(StorageError::MessageNotExists.into())
    }

    fn find_messages(&self, group: &GroupId, range: &MsgRange) -> Result<Vec<SharedMessage>> {
        require(group)?;
        require_range(range)?;
        Err(StorageError::MessageNotExists.into())
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        require(id)
    }
}
