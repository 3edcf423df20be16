//! Entities of the admin service.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::traits::Entity;

/// Columns every table has.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id:         u64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "deletedAt", default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn new(id: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new(0)
    }
}

macro_rules! entity {
    ($ty:ty, $ns:literal) => {
        impl Entity for $ty {
            const NAMESPACE: &'static str = $ns;

            #[inline]
            fn id(&self) -> u64 {
                self.model.id
            }

            #[inline]
            fn set_id(&mut self, id: u64) {
                self.model.id = id;
            }
        }
    };
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Api {
    #[serde(flatten)]
    pub model:     Model,
    pub handle:    String,
    pub title:     String,
    pub path:      String,
    #[serde(rename = "type")]
    pub kind:      String,
    pub action:    String,
    pub create_by: i32,
    pub update_by: i32,
}

impl Api {
    pub fn new<S: ToString>(id: u64, handle: S, title: S) -> Self {
        Self {
            model: Model::new(id),
            handle: handle.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }
}

entity!(Api, "api");

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(flatten)]
    pub model:      Model,
    pub role_id:    i32,
    pub role_name:  String,
    pub status:     String,
    pub role_key:   String,
    pub role_sort:  i32,
    pub flag:       String,
    pub remark:     String,
    pub admin:      String,
    pub data_scope: String,
    pub create_by:  i32,
    pub update_by:  i32,
}

impl Role {
    pub fn new<S: ToString>(id: u64, role_name: S, role_key: S) -> Self {
        Self {
            model: Model::new(id),
            role_name: role_name.to_string(),
            role_key: role_key.to_string(),
            ..Default::default()
        }
    }
}

entity!(Role, "role");

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(flatten)]
    pub model:    Model,
    pub name:     String,
    pub password: String,
    pub email:    String,
    pub phone:    String,
    pub avatar:   String,
    pub age:      i32,
    /// 1: male, 2: female, anything else: unknown.
    pub gender:   i32,
    /// 1: inactive, 2: activated, 3: blocked.
    pub status:   i32,
    /// Unix timestamp of the last login.
    pub login_at: u64,
}

impl User {
    pub fn new<S: ToString>(id: u64, name: S, email: S) -> Self {
        Self {
            model: Model::new(id),
            name: name.to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }
}

entity!(User, "user");
