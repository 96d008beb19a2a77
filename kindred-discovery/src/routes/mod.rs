pub mod candidates;
pub mod health;
pub mod location;
pub mod matches;
pub mod reports;
pub mod requests;
