//! On-disk document layout of the JSON store.
//!
//! ```text
//! { "VERSION": "0.0.0.1",
//!   "USERS": [..], "GROUPS": [..], "MESSAGES": [..],
//!   "RELATIONS": { "USER_CONTACTS": [{ "user_UUID", "contacts" }],
//!                  "GROUP_USERS":   [{ "group_UUID", "users" }] } }
//! ```
//!
//! Writing goes through serde; reading checks every record field by field
//! so a damaged file reports which attribute is broken.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use courier_shared::{Group, GroupId, Message, MessageData, MessageId, MessageType, Sex, User, UserId};

use super::state::JsonState;
use crate::error::{Error, Result, StorageError, SystemError};

pub const FORMAT_VERSION: &str = "0.0.0.1";

const J_VERSION: &str = "VERSION";
const J_USERS: &str = "USERS";
const J_GROUPS: &str = "GROUPS";
const J_MESSAGES: &str = "MESSAGES";
const J_RELATIONS: &str = "RELATIONS";
const J_USER_CONTACTS: &str = "USER_CONTACTS";
const J_GROUP_USERS: &str = "GROUP_USERS";

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "VERSION")]
    version: &'a str,
    #[serde(rename = "USERS")]
    users: Vec<&'a User>,
    #[serde(rename = "GROUPS")]
    groups: Vec<&'a Group>,
    #[serde(rename = "MESSAGES")]
    messages: Vec<&'a Message>,
    #[serde(rename = "RELATIONS")]
    relations: RelationsDoc,
}

#[derive(Serialize)]
struct RelationsDoc {
    #[serde(rename = "USER_CONTACTS")]
    user_contacts: Vec<ContactsDoc>,
    #[serde(rename = "GROUP_USERS")]
    group_users: Vec<MembersDoc>,
}

#[derive(Serialize)]
struct ContactsDoc {
    #[serde(rename = "user_UUID")]
    user: UserId,
    contacts: Vec<UserId>,
}

#[derive(Serialize)]
struct MembersDoc {
    #[serde(rename = "group_UUID")]
    group: GroupId,
    users: Vec<UserId>,
}

/// Render the state as a pretty-printed document.  Records are sorted so
/// the same state always produces the same bytes.
pub(crate) fn render(state: &JsonState) -> Result<String> {
    let mut users: Vec<&User> = state.users().collect();
    users.sort_by_key(|u| u.id());
    let mut groups: Vec<&Group> = state.groups().collect();
    groups.sort_by_key(|g| g.id());
    let mut messages: Vec<&Message> = state.messages().collect();
    messages.sort_by_key(|m| (m.group_id(), m.create_time(), m.id()));

    let mut user_contacts: Vec<ContactsDoc> = state
        .contact_lists()
        .map(|(user, set)| {
            let mut contacts: Vec<UserId> = set.iter().copied().collect();
            contacts.sort();
            ContactsDoc {
                user: *user,
                contacts,
            }
        })
        .collect();
    user_contacts.sort_by_key(|doc| doc.user);

    let mut group_users: Vec<MembersDoc> = state
        .member_lists()
        .map(|(group, set)| {
            let mut users: Vec<UserId> = set.iter().copied().collect();
            users.sort();
            MembersDoc {
                group: *group,
                users,
            }
        })
        .collect();
    group_users.sort_by_key(|doc| doc.group);

    let doc = Document {
        version: FORMAT_VERSION,
        users,
        groups,
        messages,
        relations: RelationsDoc {
            user_contacts,
            group_users,
        },
    };
    serde_json::to_string_pretty(&doc).map_err(|_| SystemError::OutputOperationFail.into())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parsed document plus the number of relation edges that pointed at
/// entities no longer present.
pub(crate) struct Loaded {
    pub state: JsonState,
    pub pruned: usize,
}

pub(crate) fn parse(text: &str) -> Result<Loaded> {
    let root: Value = serde_json::from_str(text).map_err(|_| SystemError::ReadFileFail)?;
    let root = root.as_object().ok_or(SystemError::ReadFileFail)?;

    match root.get(J_VERSION).and_then(Value::as_str) {
        Some(FORMAT_VERSION) => {}
        _ => return Err(SystemError::IncorrectVersion.into()),
    }

    let mut state = JsonState::default();

    for record in array(root, J_USERS)? {
        let user = parse_user(record)?;
        state.add_user(user).map_err(|e| {
            if e == StorageError::UserAlreadyExists {
                StorageError::UserUUIDAlreadyRegistered.into()
            } else {
                e
            }
        })?;
    }

    for record in array(root, J_GROUPS)? {
        state.add_group(parse_group(record)?)?;
    }

    for record in array(root, J_MESSAGES)? {
        state.add_message(parse_message(record)?).map_err(|e| {
            if e == StorageError::GroupNotExists {
                StorageError::MessageGroupUUIDCorrupted.into()
            } else {
                e
            }
        })?;
    }

    let relations = root
        .get(J_RELATIONS)
        .and_then(Value::as_object)
        .ok_or(SystemError::ReadFileFail)?;
    let mut pruned = 0;

    for entry in array(relations, J_USER_CONTACTS)? {
        let corrupted = StorageError::UserContactsCorrupted;
        let obj = entry.as_object().ok_or(corrupted)?;
        let user: UserId = field(obj, "user_UUID", corrupted)?;
        let contacts: Vec<UserId> = field(obj, "contacts", corrupted)?;
        for contact in contacts {
            if !state.restore_contact(user, contact)? {
                pruned += 1;
            }
        }
    }

    for entry in array(relations, J_GROUP_USERS)? {
        let corrupted = StorageError::GroupUsersCorrupted;
        let obj = entry.as_object().ok_or(corrupted)?;
        let group: GroupId = field(obj, "group_UUID", corrupted)?;
        let users: Vec<UserId> = field(obj, "users", corrupted)?;
        for user in users {
            if !state.restore_member(group, user) {
                pruned += 1;
            }
        }
    }

    Ok(Loaded { state, pruned })
}

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Vec<Value>> {
    obj.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| SystemError::ReadFileFail.into())
}

fn field<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    key: &str,
    corrupted: StorageError,
) -> Result<T> {
    let value = obj.get(key).ok_or(corrupted)?;
    serde_json::from_value(value.clone()).map_err(|_| corrupted.into())
}

/// Deserialize a record that has already passed field validation.
fn build<T: DeserializeOwned>(record: &Value, corrupted: StorageError) -> Result<T> {
    serde_json::from_value(record.clone()).map_err(|_| Error::from(corrupted))
}

fn parse_user(record: &Value) -> Result<User> {
    let obj = record.as_object().ok_or(StorageError::UserUUIDCorrupted)?;

    field::<UserId>(obj, "UUID", StorageError::UserUUIDCorrupted)?;
    field::<DateTime<Utc>>(obj, "registration_date", StorageError::UserRegistrationDateCorrupted)?;
    let login: String = field(obj, "login", StorageError::UserLoginCorrupted)?;
    if login.is_empty() {
        return Err(StorageError::UserLoginCorrupted.into());
    }
    let hash: String = field(obj, "password_hash", StorageError::UserPasswordHashCorrupted)?;
    if hex::decode(&hash).is_err() {
        return Err(StorageError::UserPasswordHashCorrupted.into());
    }
    field::<String>(obj, "name", StorageError::UserNameCorrupted)?;
    field::<Sex>(obj, "sex", StorageError::UserSexCorrupted)?;
    field::<Option<NaiveDate>>(obj, "birthday", StorageError::UserBirthdayCorrupted)?;

    build(record, StorageError::UserUUIDCorrupted)
}

fn parse_group(record: &Value) -> Result<Group> {
    let obj = record.as_object().ok_or(StorageError::GroupUUIDCorrupted)?;

    field::<GroupId>(obj, "UUID", StorageError::GroupUUIDCorrupted)?;
    field::<DateTime<Utc>>(obj, "registration_date", StorageError::GroupRegistrationDateCorrupted)?;
    field::<String>(obj, "name", StorageError::GroupNameCorrupted)?;

    build(record, StorageError::GroupUUIDCorrupted)
}

fn parse_message(record: &Value) -> Result<Message> {
    let obj = record.as_object().ok_or(StorageError::MessageUUIDCorrupted)?;

    field::<MessageId>(obj, "UUID", StorageError::MessageUUIDCorrupted)?;
    field::<GroupId>(obj, "GROUP_UUID", StorageError::MessageGroupUUIDCorrupted)?;
    field::<DateTime<Utc>>(obj, "registration_date", StorageError::MessageCreateTimeCorrupted)?;
    let kind: MessageType = field(obj, "type", StorageError::MessageTypeCorrupted)?;
    let payload = json!({ "type": kind, "data": obj.get("data") });
    serde_json::from_value::<MessageData>(payload)
        .map_err(|_| Error::from(StorageError::MessageDataCorrupted))?;

    build(record, StorageError::MessageUUIDCorrupted)
}
