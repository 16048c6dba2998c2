//! The storage contract implemented by every backend.
//!
//! All methods take `&self`; backends lock internally so one instance can be
//! shared across caller threads behind an `Arc<dyn DataStorage>`.
//!
//! Entities cross the contract as shared handles.  A backend may keep the
//! caller's handle (the TTL cache does, so lookups return the very same
//! object) or copy the value out of it (the JSON store does).  Callers must
//! not hold a handle's lock guard across a storage call.

use courier_shared::{
    ContactSet, GroupId, GroupSet, MemberSet, MessageId, MsgRange, SharedGroup, SharedMessage,
    SharedUser, UserId,
};

use crate::error::{Result, SystemError};

pub trait DataStorage: Send + Sync {
    // -- lifecycle --

    fn open(&self) -> Result<()>;

    /// Release the backend.  Persistent backends flush before returning.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    // -- users --

    fn add_user(&self, user: &SharedUser) -> Result<()>;

    fn update_user(&self, user: &SharedUser) -> Result<()>;

    fn find_user_by_uuid(&self, id: &UserId) -> Result<SharedUser>;

    /// Look a user up by login and password hash (see
    /// [`courier_shared::hash_password`]).
    fn find_user_by_authentication(&self, login: &str, password_hash: &[u8])
        -> Result<SharedUser>;

    fn remove_user(&self, id: &UserId) -> Result<()>;

    /// Replace the contact list of `user`.  Contacts are symmetric.
    fn set_user_contacts(&self, user: &UserId, contacts: ContactSet) -> Result<()>;

    fn add_user_contact(&self, user: &UserId, contact: &UserId) -> Result<()>;

    fn remove_user_contact(&self, user: &UserId, contact: &UserId) -> Result<()>;

    fn clear_user_contacts(&self, user: &UserId) -> Result<()>;

    fn get_user_contact_list(&self, user: &UserId) -> Result<ContactSet>;

    fn get_user_groups(&self, user: &UserId) -> Result<GroupSet>;

    // -- groups --

    fn add_group(&self, group: &SharedGroup) -> Result<()>;

    fn update_group(&self, group: &SharedGroup) -> Result<()>;

    fn find_group_by_uuid(&self, id: &GroupId) -> Result<SharedGroup>;

    fn remove_group(&self, id: &GroupId) -> Result<()>;

    fn set_group_users(&self, group: &GroupId, users: MemberSet) -> Result<()>;

    fn add_group_user(&self, group: &GroupId, user: &UserId) -> Result<()>;

    fn remove_group_user(&self, group: &GroupId, user: &UserId) -> Result<()>;

    fn clear_group_users(&self, group: &GroupId) -> Result<()>;

    fn get_group_user_list(&self, group: &GroupId) -> Result<MemberSet>;

    // -- messages --

    fn add_message(&self, message: &SharedMessage) -> Result<()>;

    fn update_message(&self, message: &SharedMessage) -> Result<()>;

    fn find_message(&self, id: &MessageId) -> Result<SharedMessage>;

    /// Messages of `group` created within `range` (inclusive), oldest first.
    fn find_messages(&self, group: &GroupId, range: &MsgRange) -> Result<Vec<SharedMessage>>;

    fn remove_message(&self, id: &MessageId) -> Result<()>;
}

/// Identifiers that can stand for "no entity".
pub(crate) trait Identifier {
    fn is_nil(&self) -> bool;
}

macro_rules! impl_identifier {
    ($($t:ty),*) => {
        $(impl Identifier for $t {
            fn is_nil(&self) -> bool {
                <$t>::is_nil(self)
            }
        })*
    };
}

impl_identifier!(UserId, GroupId, MessageId);

/// Reject the nil identifier, the in-process stand-in for an absent object.
pub(crate) fn require<I: Identifier>(id: &I) -> Result<()> {
    if id.is_nil() {
        return Err(SystemError::InvalidArgument.into());
    }
    Ok(())
}

pub(crate) fn require_range(range: &MsgRange) -> Result<()> {
    if !range.is_valid() {
        return Err(SystemError::InvalidArgument.into());
    }
    Ok(())
}
