use super::server::BeveragePreferenceHandler;
use super::types::{BeverageType, GetBeverageRequest, SelectionError, ServiceException};
use crate::random::{RandomSource, ThreadRandom};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const HOT_BEVERAGES: [&str; 3] = ["cappuccino", "latte", "espresso"];
pub const COLD_BEVERAGES: [&str; 3] = ["lemonade", "ice tea", "soda"];

/// Candidate beverages per category. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeverageMenu {
    hot: Vec<String>,
    cold: Vec<String>,
}

impl BeverageMenu {
    /// Builds a menu from arbitrary lists. Empty lists are allowed here and
    /// reported when a selection hits them.
    pub fn new<H, C>(hot: H, cold: C) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            hot: hot.into_iter().map(Into::into).collect(),
            cold: cold.into_iter().map(Into::into).collect(),
        }
    }

    pub fn candidates(&self, btype: BeverageType) -> &[String] {
        match btype {
            BeverageType::Hot => &self.hot,
            BeverageType::Cold => &self.cold,
        }
    }

    /// Fails on the first category that has nothing to offer.
    pub fn validate(&self) -> Result<(), SelectionError> {
        match BeverageType::ALL
            .into_iter()
            .find(|btype| self.candidates(*btype).is_empty())
        {
            Some(btype) => Err(SelectionError::NoCandidates(btype)),
            None => Ok(()),
        }
    }
}

impl Default for BeverageMenu {
    fn default() -> Self {
        Self::new(HOT_BEVERAGES, COLD_BEVERAGES)
    }
}

/// Picks a beverage for a category, uniformly at random.
pub struct BeverageSelector<R = ThreadRandom> {
    menu: Arc<BeverageMenu>,
    rng: R,
}

impl BeverageSelector<ThreadRandom> {
    pub fn new() -> Self {
        Self::with_source(ThreadRandom)
    }
}

impl Default for BeverageSelector<ThreadRandom> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RandomSource> BeverageSelector<R> {
    pub fn with_source(rng: R) -> Self {
        Self {
            menu: Arc::new(BeverageMenu::default()),
            rng,
        }
    }

    pub fn with_menu(mut self, menu: impl Into<Arc<BeverageMenu>>) -> Self {
        self.menu = menu.into();
        self
    }

    pub fn menu(&self) -> &BeverageMenu {
        &self.menu
    }

    pub fn select(&self, btype: BeverageType) -> Result<&str, SelectionError> {
        let candidates = self.menu.candidates(btype);
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates(btype));
        }

        let len = candidates.len();
        let index = self.rng.pick(len);
        let beverage = candidates
            .get(index)
            .ok_or(SelectionError::SourceOutOfRange { index, len })?
            .as_str();

        info!(btype = %btype, beverage, "Selected beverage");
        Ok(beverage)
    }

    pub fn select_code(&self, code: i32) -> Result<&str, SelectionError> {
        self.select(BeverageType::from_code(code)?)
    }
}

#[async_trait]
impl<R: RandomSource + 'static> BeveragePreferenceHandler for BeverageSelector<R> {
    async fn get_beverage(&self, request: GetBeverageRequest) -> Result<String, ServiceException> {
        match self.select_code(request.btype) {
            Ok(beverage) => Ok(beverage.to_owned()),
            Err(err) => {
                warn!(code = request.btype, error = %err, "GetBeverage failed");
                Err(err.into())
            }
        }
    }
}
