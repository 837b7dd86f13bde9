//! Built-in crypto market vocabulary.
//!
//! The two lists are disjoint. Single-word terms are stems that also match
//! their usual inflections (`pump` covers `pumping`, `pumped`). Stems that
//! would collide with unrelated words (`bull` and `bullet`, `bear` and
//! `bearing`) are listed as whole words instead.

pub(crate) const BULLISH_TERMS: &[&str] = &[
    "all time high",
    "breaking out",
    "short squeeze",
    "buy the dip",
    "bull market",
    "bull run",
    "accumulat",
    "adoption",
    "approval",
    "approved",
    "ath",
    "boom",
    "breakout",
    "bullish",
    "bulls",
    "buying",
    "gain",
    "green",
    "growth",
    "hodl",
    "inflow",
    "integrat",
    "launch",
    "lambo",
    "moon",
    "optimis",
    "outperform",
    "partnership",
    "profit",
    "pump",
    "rallied",
    "rallies",
    "rally",
    "rebound",
    "recover",
    "recovery",
    "rise",
    "rising",
    "soar",
    "strong",
    "support",
    "surg",
    "upgrade",
    "uptrend",
    "win",
];

pub(crate) const BEARISH_TERMS: &[&str] = &[
    "rug pull",
    "sell off",
    "death cross",
    "bear market",
    "bearish",
    "bears",
    "ban",
    "breach",
    "capitulat",
    "collaps",
    "concern",
    "crash",
    "declin",
    "delist",
    "downtrend",
    "drop",
    "dump",
    "exploit",
    "fall",
    "fell",
    "fear",
    "fraud",
    "fud",
    "hack",
    "investigat",
    "lawsuit",
    "liquidat",
    "loss",
    "outflow",
    "panic",
    "plung",
    "plummet",
    "red",
    "rekt",
    "scam",
    "selloff",
    "slump",
    "tank",
    "weak",
    "warning",
];
