pub mod authority;
pub mod commands;
pub mod controller;
pub mod error;
pub mod library;
pub mod paste;
pub mod player;
pub mod resolver;
pub mod service;
pub mod sessions;
pub mod vote;
