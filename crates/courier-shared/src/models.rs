//! Entities stored by courier backends.
//!
//! Every struct derives `Serialize` and `Deserialize`; the serde field names
//! are the ones used by the JSON store on disk.  Identity and creation
//! timestamps are fixed at construction, everything else has a setter.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{Result, SystemError};
use crate::types::{GroupId, MessageId, UserId};

/// Shared, mutable handle to a user.  Cache backends hand out the same
/// handle on every lookup, so writes through it are seen by every holder.
pub type SharedUser = Arc<RwLock<User>>;
pub type SharedGroup = Arc<RwLock<Group>>;
pub type SharedMessage = Arc<RwLock<Message>>;

/// SHA-512 digest of a plain-text password.
pub fn hash_password(plain: &str) -> Vec<u8> {
    Sha512::digest(plain.as_bytes()).to_vec()
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Declared sex of a user.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Sex {
    #[default]
    NotSpecified,
    Male,
    Female,
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(rename = "UUID")]
    id: UserId,
    registration_date: DateTime<Utc>,
    login: String,
    /// Never the plain text; see [`User::set_password`].
    #[serde(with = "hex_bytes")]
    password_hash: Vec<u8>,
    name: String,
    sex: Sex,
    birthday: Option<NaiveDate>,
}

impl User {
    /// A new user registered now.
    pub fn new(id: UserId, login: impl Into<String>) -> Self {
        Self::with_registration_date(id, Utc::now(), login)
    }

    /// A user with an explicit registration timestamp, as read back from
    /// storage.
    pub fn with_registration_date(
        id: UserId,
        registration_date: DateTime<Utc>,
        login: impl Into<String>,
    ) -> Self {
        Self {
            id,
            registration_date,
            login: login.into(),
            password_hash: Vec::new(),
            name: String::new(),
            sex: Sex::NotSpecified,
            birthday: None,
        }
    }

    /// Unique identifier, fixed at construction.
    pub fn id(&self) -> UserId {
        self.id
    }

    /// When the account was created.  Never changes.
    pub fn registration_date(&self) -> DateTime<Utc> {
        self.registration_date
    }

    /// Login name.  The JSON store keeps logins unique and non-empty.
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Rename the login.  Uniqueness is checked by the store on update.
    pub fn set_login(&mut self, login: impl Into<String>) {
        self.login = login.into();
    }

    /// SHA-512 digest of the password, empty if none was set.
    pub fn password_hash(&self) -> &[u8] {
        &self.password_hash
    }

    /// Store an already computed digest (see [`hash_password`]).
    pub fn set_password_hash(&mut self, hash: Vec<u8>) {
        self.password_hash = hash;
    }

    /// Replace the stored hash with the digest of `plain`.
    pub fn set_password(&mut self, plain: &str) -> Result<()> {
        if plain.is_empty() {
            return Err(SystemError::InvalidArgument.into());
        }
        self.password_hash = hash_password(plain);
        Ok(())
    }

    /// `true` if `plain` hashes to the stored digest.
    pub fn check_password(&self, plain: &str) -> bool {
        !self.password_hash.is_empty() && self.password_hash == hash_password(plain)
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn sex(&self) -> Sex {
        self.sex
    }

    pub fn set_sex(&mut self, sex: Sex) {
        self.sex = sex;
    }

    /// Date of birth, if the user gave one.
    pub fn birthday(&self) -> Option<NaiveDate> {
        self.birthday
    }

    pub fn set_birthday(&mut self, birthday: Option<NaiveDate>) {
        self.birthday = birthday;
    }

    /// Wrap into a shared handle for the storage contract.
    pub fn share(self) -> SharedUser {
        Arc::new(RwLock::new(self))
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A chat group.  Members are tracked by the storage relations, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    #[serde(rename = "UUID")]
    id: GroupId,
    registration_date: DateTime<Utc>,
    name: String,
}

impl Group {
    /// A new group registered now, with an empty name.
    pub fn new(id: GroupId) -> Self {
        Self::with_registration_date(id, Utc::now())
    }

    /// A group with an explicit registration timestamp.
    pub fn with_registration_date(id: GroupId, registration_date: DateTime<Utc>) -> Self {
        Self {
            id,
            registration_date,
            name: String::new(),
        }
    }

    /// Unique identifier, fixed at construction.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// When the group was created.  Never changes.
    pub fn registration_date(&self) -> DateTime<Utc> {
        self.registration_date
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Wrap into a shared handle for the storage contract.
    pub fn share(self) -> SharedGroup {
        Arc::new(RwLock::new(self))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Kind of payload a message carries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    #[default]
    Empty,
    Text,
    Image,
}

/// Typed message payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageData {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "data", with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl MessageData {
    /// Payload of the given kind.
    pub fn new(kind: MessageType, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// UTF-8 text payload.
    pub fn text(text: &str) -> Self {
        Self::new(MessageType::Text, text.as_bytes().to_vec())
    }
}

/// A message posted to a group.  The owning group and the creation time
/// never change; the creation time is also the ordering key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(rename = "UUID")]
    id: MessageId,
    #[serde(rename = "GROUP_UUID")]
    group_id: GroupId,
    #[serde(rename = "registration_date")]
    create_time: DateTime<Utc>,
    #[serde(flatten)]
    data: MessageData,
}

impl Message {
    /// A message in `group_id` created now, with an empty payload.
    pub fn new(id: MessageId, group_id: GroupId) -> Self {
        Self::with_create_time(id, group_id, Utc::now())
    }

    /// A message with an explicit creation time.
    pub fn with_create_time(id: MessageId, group_id: GroupId, create_time: DateTime<Utc>) -> Self {
        Self {
            id,
            group_id,
            create_time,
            data: MessageData::default(),
        }
    }

    /// Unique identifier, fixed at construction.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Owning group.  A message cannot move to another group.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Creation time, also the ordering key for range queries.
    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    /// Current payload.
    pub fn data(&self) -> &MessageData {
        &self.data
    }

    /// Replace the payload.  An `Empty` payload is rejected.
    pub fn set_data(&mut self, data: MessageData) -> Result<()> {
        if data.kind == MessageType::Empty {
            return Err(SystemError::IncorrectData.into());
        }
        self.data = data;
        Ok(())
    }

    /// Wrap into a shared handle for the storage contract.
    pub fn share(self) -> SharedMessage {
        Arc::new(RwLock::new(self))
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
