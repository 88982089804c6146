//! API handlers

pub mod auth;
pub mod calendar;
pub mod event;
pub mod health;
