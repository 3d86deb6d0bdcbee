//! Named real-time channels

use std::fmt;
use std::str::FromStr;

use crate::core::{Error, TradingPair};
use crate::signer::AccountId;

const RECENT_TRADES_SUFFIX: &str = "-recent-trades";
const OB_INC_SUFFIX: &str = "-ob-inc";

/// Every channel the connector can subscribe to.
/// Market channels use exchange market names (`PDEX-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    RecentTrades(TradingPair),
    OrderBookIncrement(TradingPair),
    /// Balance and order pushes for a main account
    User(AccountId),
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Channel::RecentTrades(pair) => format!("{}{}", pair, RECENT_TRADES_SUFFIX),
            Channel::OrderBookIncrement(pair) => format!("{}{}", pair, OB_INC_SUFFIX),
            Channel::User(main) => main.to_ss58(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if let Some(pair) = name.strip_suffix(RECENT_TRADES_SUFFIX) {
            return Ok(Channel::RecentTrades(TradingPair::new(pair)));
        }
        if let Some(pair) = name.strip_suffix(OB_INC_SUFFIX) {
            return Ok(Channel::OrderBookIncrement(TradingPair::new(pair)));
        }
        AccountId::from_ss58(name)
            .map(Channel::User)
            .map_err(|_| Error::Decode(format!("unknown channel {:?}", name)))
    }
}
