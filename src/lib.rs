//! # meting-dl
//!
//! Batch music downloader for online music catalogs, plus an interactive
//! login helper that captures the session cookie the downloader needs for
//! full-quality audio.
//!
//! ## Downloads
//!
//! Tracks are found either by keyword search ([`search`]) or by album
//! ([`planner::Planner::albums`]). The [`planner`] feeds them one at a time to
//! the [`downloader`], which resolves a playback URL from the [`catalog`],
//! fetches it over [`http`] and streams the body through a [`source`] into a
//! file ([`writer`]). Progress is drawn by [`progress`].
//!
//! A failed track never aborts a run; it is reported and counted.
//!
//! ## Cookie capture
//!
//! The [`capture`] session drives a browser through WebDriver
//! ([`protocol::webdriver`]) to a platform's login page and polls the
//! browser's cookie jar until the operator has logged in.
//!
//! ## Providers
//!
//! Catalog adapters live in [`protocol`]. Only NetEase Cloud Music is
//! implemented for downloads; cookie capture supports every [`config::Platform`].

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod capture;
pub mod catalog;
pub mod config;
pub mod cookie;
pub mod downloader;
pub mod error;
pub mod http;
pub mod planner;
pub mod progress;
pub mod protocol;
pub mod search;
pub mod source;
pub mod track;
pub mod writer;
