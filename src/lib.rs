pub mod caption;
pub mod category;
pub mod commerce;
pub mod config;
pub mod db;
pub mod delivery;
pub mod flows;
pub mod format;
pub mod handlers;
pub mod ledger;
pub mod media_group;
pub mod model;
pub mod sku;
pub mod vision;
pub mod webhook;
