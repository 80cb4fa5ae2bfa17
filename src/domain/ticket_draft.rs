//! Ticket authoring drafts and their validation rules.
//!
//! Single and multi-ticket forms share one rule set. Validation is purely
//! local: nothing reaches the backend until every draft in a submission
//! passes.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{BettingSite, UserId};

/// Which authoring form produced the drafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthoringMode {
    /// Single-step wizard.
    Single,
    /// N-row bulk editor; every ticket is an accumulator of 2+ legs.
    Multi,
}

/// Raw form input for one ticket.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TicketDraft {
    /// Headline.
    #[serde(default)]
    pub title: String,
    /// Analysis text.
    #[serde(default)]
    pub description: String,
    /// Bookmaker name as entered.
    #[serde(default)]
    pub betting_site: String,
    /// Booking code.
    #[serde(default)]
    pub ticket_code: String,
    /// Combined odds as entered.
    #[serde(default)]
    pub odds: String,
    /// Number of legs.
    #[serde(default)]
    pub number_of_legs: Option<u32>,
    /// Asking price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Give the ticket away.
    #[serde(default)]
    pub is_free: bool,
    /// Kickoff date in marketplace local time.
    #[serde(default)]
    pub kickoff_date: Option<NaiveDate>,
    /// Kickoff time in marketplace local time.
    #[serde(default)]
    pub kickoff_time: Option<NaiveTime>,
}

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    /// Position of the draft in the submission.
    pub ticket_index: usize,
    /// Offending field.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    #[must_use]
    pub fn new(ticket_index: usize, field: &str, message: &str) -> Self {
        Self {
            ticket_index,
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Insert payload for a validated ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTicket {
    /// Author.
    pub seller_id: UserId,
    /// Headline.
    pub title: String,
    /// Analysis text.
    pub description: String,
    /// Bookmaker.
    pub betting_site: BettingSite,
    /// Price; zero for free tickets.
    pub price: Decimal,
    /// Free flag.
    pub is_free: bool,
    /// Combined odds.
    pub odds: Decimal,
    /// Number of legs.
    pub number_of_legs: Option<u32>,
    /// Kickoff in UTC.
    pub kickoff_time: DateTime<Utc>,
    /// Booking code.
    pub ticket_code: String,
    /// Newly created tickets are visible.
    pub is_hidden: bool,
    /// Newly created tickets are not expired.
    pub is_expired: bool,
}

/// Validates every draft and, if all pass, converts them into insert rows.
///
/// # Errors
///
/// Returns every failed rule across all drafts when any draft is invalid.
pub fn validate_drafts(
    seller_id: UserId,
    drafts: &[TicketDraft],
    mode: AuthoringMode,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Vec<NewTicket>, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut tickets = Vec::with_capacity(drafts.len());
    let mut seen_codes = HashSet::new();

    if drafts.is_empty() {
        errors.push(FieldError::new(0, "tickets", "at least one ticket is required"));
    }

    for (index, draft) in drafts.iter().enumerate() {
        let before = errors.len();

        if draft.title.trim().is_empty() {
            errors.push(FieldError::new(index, "title", "title is required"));
        }
        if draft.description.trim().is_empty() {
            errors.push(FieldError::new(index, "description", "description is required"));
        }

        let site = if draft.betting_site.trim().is_empty() {
            errors.push(FieldError::new(index, "betting_site", "betting site is required"));
            None
        } else {
            match draft.betting_site.parse::<BettingSite>() {
                Ok(site) => Some(site),
                Err(message) => {
                    errors.push(FieldError::new(index, "betting_site", &message));
                    None
                }
            }
        };

        // Codes are stored uppercase so uniqueness checks compare one form.
        let code = draft.ticket_code.trim().to_ascii_uppercase();
        if code.is_empty() {
            errors.push(FieldError::new(index, "ticket_code", "ticket code is required"));
        } else if !seen_codes.insert(code.clone()) {
            errors.push(FieldError::new(
                index,
                "ticket_code",
                "ticket code appears more than once in this submission",
            ));
        }

        let odds = match draft.odds.trim().parse::<Decimal>() {
            Ok(odds) if odds > Decimal::ZERO => Some(odds),
            Ok(_) => {
                errors.push(FieldError::new(index, "odds", "odds must be positive"));
                None
            }
            Err(_) => {
                errors.push(FieldError::new(index, "odds", "odds must be a number"));
                None
            }
        };

        match (mode, draft.number_of_legs) {
            (AuthoringMode::Multi, None) => {
                errors.push(FieldError::new(index, "number_of_legs", "number of legs is required"));
            }
            (AuthoringMode::Multi, Some(legs)) if legs < 2 => {
                errors.push(FieldError::new(
                    index,
                    "number_of_legs",
                    "a multi ticket needs at least 2 legs",
                ));
            }
            (AuthoringMode::Single, Some(0)) => {
                errors.push(FieldError::new(index, "number_of_legs", "number of legs must be positive"));
            }
            _ => {}
        }

        let price = if draft.is_free {
            Decimal::ZERO
        } else {
            match draft.price {
                Some(price) if price > Decimal::ZERO => price,
                _ => {
                    errors.push(FieldError::new(
                        index,
                        "price",
                        "price must be positive unless the ticket is free",
                    ));
                    Decimal::ZERO
                }
            }
        };

        let kickoff = match (draft.kickoff_date, draft.kickoff_time) {
            (Some(date), Some(time)) => {
                match offset.from_local_datetime(&date.and_time(time)).single() {
                    Some(local) if local.with_timezone(&Utc) > now => {
                        Some(local.with_timezone(&Utc))
                    }
                    Some(_) => {
                        errors.push(FieldError::new(
                            index,
                            "kickoff_time",
                            "kickoff time must be in the future",
                        ));
                        None
                    }
                    None => {
                        errors.push(FieldError::new(index, "kickoff_time", "invalid kickoff time"));
                        None
                    }
                }
            }
            _ => {
                errors.push(FieldError::new(
                    index,
                    "kickoff_time",
                    "kickoff date and time are required",
                ));
                None
            }
        };

        if errors.len() > before {
            continue;
        }
        if let (Some(betting_site), Some(odds), Some(kickoff_time)) = (site, odds, kickoff) {
            tickets.push(NewTicket {
                seller_id,
                title: draft.title.trim().to_string(),
                description: draft.description.trim().to_string(),
                betting_site,
                price,
                is_free: draft.is_free,
                odds,
                number_of_legs: draft.number_of_legs,
                kickoff_time,
                ticket_code: code,
                is_hidden: false,
                is_expired: false,
            });
        }
    }

    if errors.is_empty() {
        Ok(tickets)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sast() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap_or_else(|| panic!("valid offset"))
    }

    fn valid_draft(now: DateTime<Utc>, code: &str) -> TicketDraft {
        let local = (now + Duration::days(1)).with_timezone(&sast());
        TicketDraft {
            title: "Weekend acca".to_string(),
            description: "Four home wins".to_string(),
            betting_site: "betway".to_string(),
            ticket_code: code.to_string(),
            odds: "12.5".to_string(),
            number_of_legs: Some(4),
            price: Some(Decimal::from(25)),
            is_free: false,
            kickoff_date: Some(local.date_naive()),
            kickoff_time: Some(local.time()),
        }
    }

    fn fields(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn valid_batch_converts_to_rows() {
        let now = Utc::now();
        let drafts = vec![valid_draft(now, "AAA111"), valid_draft(now, "BBB222")];
        let Ok(rows) = validate_drafts(UserId::new(), &drafts, AuthoringMode::Multi, now, sast())
        else {
            panic!("expected valid batch");
        };
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.kickoff_time > now));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let now = Utc::now();
        let drafts = vec![TicketDraft::default()];
        let Err(errors) =
            validate_drafts(UserId::new(), &drafts, AuthoringMode::Multi, now, sast())
        else {
            panic!("expected errors");
        };
        let f = fields(&errors);
        for wanted in [
            "title",
            "description",
            "betting_site",
            "ticket_code",
            "odds",
            "number_of_legs",
            "price",
            "kickoff_time",
        ] {
            assert!(f.contains(&wanted), "missing error for {wanted}");
        }
    }

    #[test]
    fn multi_requires_two_legs() {
        let now = Utc::now();
        let mut draft = valid_draft(now, "AAA111");
        draft.number_of_legs = Some(1);
        let Err(errors) =
            validate_drafts(UserId::new(), &[draft.clone()], AuthoringMode::Multi, now, sast())
        else {
            panic!("expected errors");
        };
        assert_eq!(fields(&errors), vec!["number_of_legs"]);

        assert!(validate_drafts(UserId::new(), &[draft], AuthoringMode::Single, now, sast()).is_ok());
    }

    #[test]
    fn free_ticket_needs_no_price() {
        let now = Utc::now();
        let mut draft = valid_draft(now, "AAA111");
        draft.price = None;
        draft.is_free = true;
        let Ok(rows) = validate_drafts(UserId::new(), &[draft], AuthoringMode::Single, now, sast())
        else {
            panic!("expected valid draft");
        };
        assert!(rows.iter().all(|r| r.price == Decimal::ZERO && r.is_free));
    }

    #[test]
    fn non_positive_price_rejected_when_not_free() {
        let now = Utc::now();
        let mut draft = valid_draft(now, "AAA111");
        draft.price = Some(Decimal::ZERO);
        let Err(errors) =
            validate_drafts(UserId::new(), &[draft], AuthoringMode::Single, now, sast())
        else {
            panic!("expected errors");
        };
        assert_eq!(fields(&errors), vec!["price"]);
    }

    #[test]
    fn kickoff_must_be_strictly_future() {
        let now = Utc::now();
        let mut draft = valid_draft(now, "AAA111");
        let local = (now - Duration::minutes(5)).with_timezone(&sast());
        draft.kickoff_date = Some(local.date_naive());
        draft.kickoff_time = Some(local.time());
        let Err(errors) =
            validate_drafts(UserId::new(), &[draft], AuthoringMode::Single, now, sast())
        else {
            panic!("expected errors");
        };
        assert_eq!(fields(&errors), vec!["kickoff_time"]);
    }

    #[test]
    fn non_numeric_odds_rejected() {
        let now = Utc::now();
        let mut draft = valid_draft(now, "AAA111");
        draft.odds = "evens".to_string();
        let Err(errors) =
            validate_drafts(UserId::new(), &[draft], AuthoringMode::Single, now, sast())
        else {
            panic!("expected errors");
        };
        assert_eq!(fields(&errors), vec!["odds"]);
    }

    #[test]
    fn one_bad_draft_blocks_whole_batch() {
        let now = Utc::now();
        let mut bad = valid_draft(now, "BBB222");
        bad.title = "   ".to_string();
        let drafts = vec![valid_draft(now, "AAA111"), bad];
        let Err(errors) =
            validate_drafts(UserId::new(), &drafts, AuthoringMode::Multi, now, sast())
        else {
            panic!("expected errors");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|e| e.ticket_index == 1));
    }

    #[test]
    fn codes_are_trimmed_and_uppercased() {
        let now = Utc::now();
        let drafts = vec![valid_draft(now, "  bw-12ab ")];
        let Ok(tickets) =
            validate_drafts(UserId::new(), &drafts, AuthoringMode::Single, now, sast())
        else {
            panic!("draft should validate");
        };
        assert_eq!(
            tickets.first().map(|t| t.ticket_code.as_str()),
            Some("BW-12AB")
        );
    }

    #[test]
    fn duplicate_codes_within_batch_rejected() {
        let now = Utc::now();
        let drafts = vec![valid_draft(now, "abc123"), valid_draft(now, "ABC123")];
        let Err(errors) =
            validate_drafts(UserId::new(), &drafts, AuthoringMode::Multi, now, sast())
        else {
            panic!("expected errors");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|e| e.field == "ticket_code" && e.ticket_index == 1));
    }
}
