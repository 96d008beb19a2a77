//! Profile builders shared by the service tests.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::models::{Context, ProfileRecord};
use crate::store::MemoryStore;

pub const NYC: (f64, f64) = (40.7128, -74.0060);

pub struct ProfileBuilder {
    record: ProfileRecord,
}

pub fn person(context: Context) -> ProfileBuilder {
    ProfileBuilder {
        record: ProfileRecord {
            user_id: Uuid::new_v4(),
            context,
            name: "Alex".into(),
            age: Some(30),
            gender: Some("female".into()),
            gender_preference: Some("female".into()),
            min_age_preference: Some(18),
            max_age_preference: Some(99),
            latitude: Some(NYC.0),
            longitude: Some(NYC.1),
            photo_refs: json!(["photos/1.jpg"]),
            updated_at: Utc::now(),
        },
    }
}

impl ProfileBuilder {
    pub fn id(mut self, id: Uuid) -> Self {
        self.record.user_id = id;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.record.name = name.into();
        self
    }

    pub fn age(mut self, age: i32) -> Self {
        self.record.age = Some(age);
        self
    }

    pub fn gender(mut self, gender: &str) -> Self {
        self.record.gender = Some(gender.into());
        self
    }

    pub fn prefers(mut self, gender: &str) -> Self {
        self.record.gender_preference = Some(gender.into());
        self
    }

    pub fn window(mut self, min: i32, max: i32) -> Self {
        self.record.min_age_preference = Some(min);
        self.record.max_age_preference = Some(max);
        self
    }

    /// Shift north of the default location by roughly `meters`.
    pub fn north_by(mut self, meters: f64) -> Self {
        self.record.latitude = Some(NYC.0 + meters / 111_195.0);
        self
    }

    pub fn without_location(mut self) -> Self {
        self.record.latitude = None;
        self.record.longitude = None;
        self
    }

    pub fn build(self) -> ProfileRecord {
        self.record
    }

    /// Store the profile and return its user id.
    pub fn seed(self, store: &MemoryStore) -> Uuid {
        let id = self.record.user_id;
        store.insert_profile(self.record);
        id
    }
}

/// Seed the same user into both contexts.
pub fn seed_everywhere(store: &MemoryStore, id: Uuid, name: &str) {
    for context in Context::ALL {
        person(context).id(id).name(name).seed(store);
    }
}
