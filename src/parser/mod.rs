//! Company page HTML → `CorporateProfile`.
//!
//! `locate` finds labeled regions, `table` turns them into rows, `classify`
//! canonicalizes sector and market text, `rules` says which strategy fills
//! which field, and `extract` runs the rules over a page set.

pub mod classify;
pub mod extract;
pub mod locate;
pub mod rules;
pub mod table;
