//! Request middleware for the management ingress.

pub mod auth;
