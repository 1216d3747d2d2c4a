//! End-of-month achievement processing and rank promotions for a clan
//! Discord server, plus the daily Wise Old Man stat sync.

pub mod aggregator;
pub mod applications;
pub mod bot;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod discord;
pub mod eom;
pub mod error;
pub mod executor;
pub mod guild;
pub mod prices;
pub mod promotion;
pub mod ranks;
pub mod report;
pub mod roster;
pub mod scheduler;
pub mod valuation;
pub mod wiseoldman;
