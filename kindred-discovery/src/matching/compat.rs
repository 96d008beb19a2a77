use serde::Deserialize;

use crate::models::{Gender, Profile};

/// Whose age window a candidate must satisfy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityMode {
    /// Only the searching user's window is checked.
    #[default]
    SelfWindow,
    /// Both users' windows must contain the other's age.
    Bilateral,
}

/// Mutual gender fit between the searching user and a candidate.
pub fn gender_fit(me: &Profile, candidate: &Profile) -> bool {
    let explicit = me.gender_preference != Gender::Any;

    let both_explicit = explicit
        && candidate.gender == me.gender_preference
        && me.gender == candidate.gender_preference;

    let open_to_any = !explicit
        && (candidate.gender_preference == me.gender || candidate.gender == me.gender_preference);

    let candidate_fits_preference = explicit
        && (candidate.gender == Gender::Any || me.gender_preference == candidate.gender);

    both_explicit || open_to_any || candidate_fits_preference
}

fn in_window(owner: &Profile, age: i32) -> bool {
    (owner.min_age_preference..=owner.max_age_preference).contains(&age)
}

pub fn compatible(me: &Profile, candidate: &Profile, mode: CompatibilityMode) -> bool {
    let ages_fit = match mode {
        CompatibilityMode::SelfWindow => in_window(me, candidate.age),
        CompatibilityMode::Bilateral => in_window(me, candidate.age) && in_window(candidate, me.age),
    };

    ages_fit && gender_fit(me, candidate)
}
