//! The `BeveragePreference` service.
//!
//! One operation, `GetBeverage`, takes a [`BeverageType`] wire code and
//! returns a beverage name from that category's [`BeverageMenu`]:
//!
//! | Category | Candidates                          |
//! |----------|-------------------------------------|
//! | `HOT`    | `cappuccino`, `latte`, `espresso`   |
//! | `COLD`   | `lemonade`, `ice tea`, `soda`       |
//!
//! The layout follows the usual stub split:
//!
//! - [`types`]: request, category enum and the declared [`ServiceException`]
//! - [`server`]: [`BeveragePreferenceHandler`] and [`BeveragePreferenceServer`]
//! - [`client`]: [`BeveragePreferenceClient`]
//!
//! [`BeverageSelector`] is the handler that holds the selection logic.
//! Codes other than `0` (HOT) and `1` (COLD) are rejected with a
//! `ServiceException`; they are never folded into COLD.

pub mod client;
pub mod server;
pub mod types;

mod selector;

pub use client::{BeverageClientError, BeveragePreferenceClient};
pub use selector::{BeverageMenu, BeverageSelector, COLD_BEVERAGES, HOT_BEVERAGES};
pub use server::{BeveragePreferenceHandler, BeveragePreferenceServer};
pub use types::{
    BeverageType, GetBeverageRequest, ParseBeverageTypeError, SelectionError, ServiceException,
    GET_BEVERAGE,
};
