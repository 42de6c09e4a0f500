pub mod auth;
pub mod dashboard;
pub mod parcel;
pub mod payment;
pub mod rider;
pub mod token;
pub mod tracking;
pub mod user;
