use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matching::pair::PairKey;
use crate::schema::{match_denials, matches, pair_requests, profiles, relationship_edges, reports};

/// Maximum number of photo references carried by a profile.
pub const MAX_PHOTOS: usize = 3;

macro_rules! text_sql_enum {
    ($ty:ty) => {
        impl ToSql<Text, Pg> for $ty {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $ty {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse().map_err(|e: String| e.into())
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// --- Context ---

/// The two independent matching surveys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Attraction,
    Friend,
}

impl Context {
    pub const ALL: [Context; 2] = [Context::Attraction, Context::Friend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Attraction => "attraction",
            Context::Friend => "friend",
        }
    }
}

impl std::str::FromStr for Context {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "attraction" | "attractions" => Ok(Context::Attraction),
            "friend" | "friends" => Ok(Context::Friend),
            _ => Err(format!("unknown context: {s}")),
        }
    }
}

text_sql_enum!(Context);

// --- EdgeState ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum EdgeState {
    Sent,
    Received,
    Accepted,
    Denied,
    Unmatched,
}

impl EdgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeState::Sent => "sent",
            EdgeState::Received => "received",
            EdgeState::Accepted => "accepted",
            EdgeState::Denied => "denied",
            EdgeState::Unmatched => "unmatched",
        }
    }

    /// Denied and unmatched pairs never come back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EdgeState::Denied | EdgeState::Unmatched)
    }
}

impl std::str::FromStr for EdgeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EdgeState::Sent),
            "received" => Ok(EdgeState::Received),
            "accepted" => Ok(EdgeState::Accepted),
            "denied" => Ok(EdgeState::Denied),
            "unmatched" => Ok(EdgeState::Unmatched),
            _ => Err(format!("unknown edge state: {s}")),
        }
    }
}

text_sql_enum!(EdgeState);

// --- Gender ---

/// Used for both a profile's gender and its preference. `Any` is only
/// meaningful as a preference but legacy records carry it as a gender too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Any,
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            "any" => Ok(Gender::Any),
            _ => Err(s.to_string()),
        }
    }
}

// --- Profile ---

/// A profile row as stored. Fields are loosely typed because the client
/// writes them directly; [`Profile::try_from`] validates.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = profiles)]
pub struct ProfileRecord {
    pub user_id: Uuid,
    pub context: Context,
    pub name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub gender_preference: Option<String>,
    pub min_age_preference: Option<i32>,
    pub max_age_preference: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub photo_refs: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProfileDefect {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown gender value `{0}`")]
    UnknownGender(String),
    #[error("age window {min}..={max} is inverted")]
    InvertedAgeWindow { min: i32, max: i32 },
    #[error("{0} photos exceeds the limit")]
    TooManyPhotos(usize),
    #[error("photo_refs is not a list of strings")]
    MalformedPhotos,
    #[error("coordinates out of range")]
    InvalidCoordinates,
}

/// A validated profile for one matching context.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_id: Uuid,
    pub context: Context,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub gender_preference: Gender,
    pub min_age_preference: i32,
    pub max_age_preference: i32,
    pub location: GeoPoint,
    pub photo_refs: Vec<String>,
}

fn parse_gender(raw: Option<&str>, field: &'static str) -> Result<Gender, ProfileDefect> {
    let raw = raw.ok_or(ProfileDefect::MissingField(field))?;
    raw.parse().map_err(ProfileDefect::UnknownGender)
}

impl TryFrom<ProfileRecord> for Profile {
    type Error = ProfileDefect;

    fn try_from(record: ProfileRecord) -> Result<Self, Self::Error> {
        let age = record.age.ok_or(ProfileDefect::MissingField("age"))?;
        let gender = parse_gender(record.gender.as_deref(), "gender")?;
        let gender_preference = parse_gender(record.gender_preference.as_deref(), "gender_preference")?;
        let min = record
            .min_age_preference
            .ok_or(ProfileDefect::MissingField("min_age_preference"))?;
        let max = record
            .max_age_preference
            .ok_or(ProfileDefect::MissingField("max_age_preference"))?;
        if min > max {
            return Err(ProfileDefect::InvertedAgeWindow { min, max });
        }

        let location = match (record.latitude, record.longitude) {
            (Some(latitude), Some(longitude)) => GeoPoint { latitude, longitude },
            (None, _) => return Err(ProfileDefect::MissingField("latitude")),
            (_, None) => return Err(ProfileDefect::MissingField("longitude")),
        };
        if !location.is_valid() {
            return Err(ProfileDefect::InvalidCoordinates);
        }

        let photo_refs: Vec<String> =
            serde_json::from_value(record.photo_refs).map_err(|_| ProfileDefect::MalformedPhotos)?;
        if photo_refs.len() > MAX_PHOTOS {
            return Err(ProfileDefect::TooManyPhotos(photo_refs.len()));
        }

        Ok(Profile {
            user_id: record.user_id,
            context: record.context,
            name: record.name,
            age,
            gender,
            gender_preference,
            min_age_preference: min,
            max_age_preference: max,
            location,
            photo_refs,
        })
    }
}

/// What the UI and the denormalized edge snapshots see of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileView {
    pub user_id: Uuid,
    pub context: Context,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub photo_refs: Vec<String>,
}

impl From<&Profile> for ProfileView {
    fn from(p: &Profile) -> Self {
        Self {
            user_id: p.user_id,
            context: p.context,
            name: p.name.clone(),
            age: p.age,
            gender: p.gender,
            photo_refs: p.photo_refs.clone(),
        }
    }
}

// --- RelationshipEdge ---

/// A directed record in its owner's ledger.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = relationship_edges)]
pub struct RelationshipEdge {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub counterpart_id: Uuid,
    pub request_id: Uuid,
    pub state: EdgeState,
    pub context: Context,
    pub snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = relationship_edges)]
pub struct NewEdge {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub counterpart_id: Uuid,
    pub request_id: Uuid,
    pub state: EdgeState,
    pub context: Context,
    pub snapshot: Option<serde_json::Value>,
}

impl NewEdge {
    pub fn new(
        owner_id: Uuid,
        counterpart_id: Uuid,
        request_id: Uuid,
        state: EdgeState,
        context: Context,
        snapshot: Option<&ProfileView>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            counterpart_id,
            request_id,
            state,
            context,
            snapshot: snapshot.and_then(|view| serde_json::to_value(view).ok()),
        }
    }
}

// --- Shared pair namespace ---

/// The one request a pair may ever have. Written insert-if-absent, so the
/// first writer wins and everyone else reads the winner.
#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = pair_requests)]
pub struct PairRequest {
    pub pair_key: String,
    pub request_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub context: Context,
    pub created_at: DateTime<Utc>,
}

impl PairRequest {
    pub fn new(sender_id: Uuid, receiver_id: Uuid, context: Context) -> Self {
        Self {
            pair_key: PairKey::new(sender_id, receiver_id).into_string(),
            request_id: Uuid::now_v7(),
            sender_id,
            receiver_id,
            context,
            created_at: Utc::now(),
        }
    }

    pub fn involves(&self, user: Uuid) -> bool {
        self.sender_id == user || self.receiver_id == user
    }

    pub fn counterpart_of(&self, user: Uuid) -> Option<Uuid> {
        if self.sender_id == user {
            Some(self.receiver_id)
        } else if self.receiver_id == user {
            Some(self.sender_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = matches)]
pub struct MatchRecord {
    #[serde(rename = "match_id")]
    pub pair_key: String,
    pub request_id: Uuid,
    pub user_a_id: Uuid,
    pub user_b_id: Uuid,
    pub context: Context,
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(request: &PairRequest) -> Self {
        let key = PairKey::new(request.sender_id, request.receiver_id);
        let (user_a_id, user_b_id) = key.members();
        Self {
            pair_key: key.into_string(),
            request_id: request.request_id,
            user_a_id,
            user_b_id,
            context: request.context,
            created_at: Utc::now(),
        }
    }

    pub fn other(&self, user: Uuid) -> Option<Uuid> {
        if self.user_a_id == user {
            Some(self.user_b_id)
        } else if self.user_b_id == user {
            Some(self.user_a_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = match_denials)]
pub struct MatchDenial {
    pub pair_key: String,
    pub request_id: Uuid,
    pub denier_id: Uuid,
    pub sender_id: Uuid,
    pub context: Context,
    pub created_at: DateTime<Utc>,
}

impl MatchDenial {
    pub fn new(request: &PairRequest) -> Self {
        Self {
            pair_key: request.pair_key.clone(),
            request_id: request.request_id,
            denier_id: request.receiver_id,
            sender_id: request.sender_id,
            context: request.context,
            created_at: Utc::now(),
        }
    }

    pub fn counterpart_of(&self, user: Uuid) -> Option<Uuid> {
        if self.denier_id == user {
            Some(self.sender_id)
        } else if self.sender_id == user {
            Some(self.denier_id)
        } else {
            None
        }
    }
}

// --- Report ---

/// Which ledger a report copy is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportScope {
    Participant(Uuid),
    Global,
}

impl ReportScope {
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            ReportScope::Participant(id) => Some(*id),
            ReportScope::Global => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = reports)]
pub struct Report {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub reporter_id: Uuid,
    pub reported_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn counterpart_of(&self, user: Uuid) -> Option<Uuid> {
        if self.reporter_id == user {
            Some(self.reported_id)
        } else if self.reported_id == user {
            Some(self.reporter_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reports)]
pub struct NewReport {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub reporter_id: Uuid,
    pub reported_id: Uuid,
}

impl NewReport {
    pub fn new(scope: ReportScope, reporter_id: Uuid, reported_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id: scope.owner_id(),
            reporter_id,
            reported_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(user_id: Uuid) -> ProfileRecord {
        ProfileRecord {
            user_id,
            context: Context::Attraction,
            name: "Sam".into(),
            age: Some(27),
            gender: Some("male".into()),
            gender_preference: Some("female".into()),
            min_age_preference: Some(21),
            max_age_preference: Some(35),
            latitude: Some(40.0),
            longitude: Some(-74.0),
            photo_refs: json!(["a.jpg", "b.jpg"]),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn valid_record_converts() {
        let id = Uuid::new_v4();
        let profile = Profile::try_from(record(id)).unwrap();
        assert_eq!(profile.user_id, id);
        assert_eq!(profile.gender, Gender::Male);
        assert_eq!(profile.gender_preference, Gender::Female);
        assert_eq!(profile.photo_refs.len(), 2);
    }

    #[test]
    fn missing_location_is_a_defect() {
        let mut r = record(Uuid::new_v4());
        r.longitude = None;
        assert_eq!(
            Profile::try_from(r).unwrap_err(),
            ProfileDefect::MissingField("longitude")
        );
    }

    #[test]
    fn inverted_window_is_a_defect() {
        let mut r = record(Uuid::new_v4());
        r.min_age_preference = Some(40);
        r.max_age_preference = Some(30);
        assert_eq!(
            Profile::try_from(r).unwrap_err(),
            ProfileDefect::InvertedAgeWindow { min: 40, max: 30 }
        );
    }

    #[test]
    fn unknown_gender_and_photo_limits() {
        let mut r = record(Uuid::new_v4());
        r.gender = Some("robot".into());
        assert!(matches!(Profile::try_from(r), Err(ProfileDefect::UnknownGender(_))));

        let mut r = record(Uuid::new_v4());
        r.photo_refs = json!(["1", "2", "3", "4"]);
        assert_eq!(Profile::try_from(r).unwrap_err(), ProfileDefect::TooManyPhotos(4));

        let mut r = record(Uuid::new_v4());
        r.photo_refs = json!({"not": "a list"});
        assert_eq!(Profile::try_from(r).unwrap_err(), ProfileDefect::MalformedPhotos);
    }

    #[test]
    fn gender_parsing_is_case_insensitive() {
        assert_eq!("Female".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!(" any ".parse::<Gender>().unwrap(), Gender::Any);
    }

    #[test]
    fn context_accepts_survey_names() {
        assert_eq!("attractions".parse::<Context>().unwrap(), Context::Attraction);
        assert_eq!("Friend".parse::<Context>().unwrap(), Context::Friend);
        assert!("work".parse::<Context>().is_err());
    }

    #[test]
    fn match_record_orders_participants() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let request = PairRequest::new(a, b, Context::Friend);
        let record = MatchRecord::new(&request);
        assert!(record.user_a_id < record.user_b_id);
        assert_eq!(record.pair_key, request.pair_key);
        assert_eq!(record.other(a), Some(b));
        assert_eq!(record.other(Uuid::new_v4()), None);
    }

    #[test]
    fn edge_states() {
        assert!(EdgeState::Denied.is_terminal());
        assert!(EdgeState::Unmatched.is_terminal());
        assert!(!EdgeState::Accepted.is_terminal());
        assert_eq!("received".parse::<EdgeState>().unwrap(), EdgeState::Received);
    }
}
