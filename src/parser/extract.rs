use std::collections::{HashMap, HashSet};

use scraper::Html;
use tracing::debug;

use super::classify::Market;
use super::rules::{evaluate, Field, FieldValue, Page, RuleTable};
use crate::model::CorporateProfile;
use crate::pages::PageSet;

/// Build a corporate profile from whatever pages were fetched. Every rule is
/// tried on its own; a miss leaves the field at its empty default.
pub fn assemble(ticker: &str, pages: &PageSet, rules: &RuleTable) -> CorporateProfile {
    let docs: HashMap<Page, Html> = Page::ALL
        .iter()
        .filter_map(|&p| pages.get(p).map(|html| (p, Html::parse_document(html))))
        .collect();

    let mut profile = CorporateProfile {
        ticker: ticker.to_string(),
        ..Default::default()
    };
    let mut filled: HashSet<Field> = HashSet::new();

    for rule in rules.iter() {
        if filled.contains(&rule.field) {
            continue;
        }
        let Some(doc) = docs.get(&rule.page) else {
            debug!(ticker, field = %rule.field, page = ?rule.page, "page not available");
            continue;
        };
        match evaluate(&rule.strategy, doc, ticker) {
            Some(value) => {
                apply(&mut profile, rule.field, value);
                filled.insert(rule.field);
            }
            None => debug!(ticker, field = %rule.field, "not found"),
        }
    }

    profile
}

fn apply(profile: &mut CorporateProfile, field: Field, value: FieldValue) {
    let summary = &mut profile.summary;
    let general = &mut profile.general;
    let ownership = &mut profile.ownership;

    match (field, value) {
        (Field::Website, FieldValue::Text(v)) => summary.website = Some(v),
        (Field::AuditFirm, FieldValue::Text(v)) => summary.audit_firm = Some(v),
        (Field::Sector, FieldValue::Sector(s)) => {
            summary.sector_main = s.main;
            summary.sector_sub = s.sub;
            summary.sector_sub_list = s.sub_list;
            summary.sector_raw = s.raw;
        }
        (Field::Market, FieldValue::Market(Market::Canonical(label))) => {
            summary.market = Some(label.to_string())
        }
        (Field::Market, FieldValue::Market(Market::Unrecognized(raw))) => {
            summary.market_raw = Some(raw)
        }
        (Field::Indices, FieldValue::List(v)) => summary.indices = v,

        (Field::Address, FieldValue::Text(v)) => general.address = Some(v),
        (Field::ProductionSites, FieldValue::List(v)) => general.production_sites = v,
        (Field::ListingDate, FieldValue::Text(v)) => general.listing_date = Some(v),

        (Field::PaidInCapital, FieldValue::Text(v)) => ownership.paid_in_capital = Some(v),
        (Field::AuthorizedCapital, FieldValue::Text(v)) => ownership.authorized_capital = Some(v),
        (Field::MajorHolders, FieldValue::Records(v)) => ownership.major_holders = v,
        (Field::FreeFloatAmount, FieldValue::Text(v)) => ownership.free_float_amount = Some(v),
        (Field::FreeFloatRatio, FieldValue::Text(v)) => ownership.free_float_ratio = Some(v),
        (Field::Subsidiaries, FieldValue::Records(v)) => ownership.subsidiaries = v,

        (Field::BoardMembers, FieldValue::Records(v)) => profile.board_members = Some(v),
        (Field::VoteRights, FieldValue::Pairs(v)) => profile.vote_rights.pairs = v,
        (Field::Participation, FieldValue::Slots(v)) => {
            for (n, value) in v {
                profile.participation.set(n, value);
            }
        }

        // Unreachable for a validated table.
        (field, value) => debug!(%field, ?value, "value kind does not fit field"),
    }
}
