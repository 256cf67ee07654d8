#![allow(unexpected_cfgs)]

//! Chat Escalation Driver - desktop automation for a chat app
//!
//! This library drives an already-installed desktop chat client the way a
//! person would: it relaunches the app, navigates to a named conversation,
//! pastes a verified prompt, waits for the reply to finish streaming and
//! copies it back out, reporting a typed failure at the step that blocked.

pub mod config;
pub mod desktop;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod flow;
pub mod fuzzy;
pub mod gate;
pub mod geometry;
pub mod guard;
pub mod locator;
pub mod logging;
pub mod protocol;
pub mod validation;
pub mod visual;
