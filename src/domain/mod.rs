//! Domain layer: marketplace rows, value types, and the event system.
//!
//! All entities are rows owned by the backend. The types here are the
//! gateway's transient, typed copies plus the pure rules (draft
//! validation, voucher time gate, payment form) that run before any
//! backend call.

pub mod case;
pub mod event_bus;
pub mod ids;
pub mod market_event;
pub mod oracle;
pub mod payment;
pub mod profile;
pub mod purchase;
pub mod ticket;
pub mod ticket_draft;
pub mod voucher;
pub mod wallet;

pub use case::{Case, CaseReply, CaseStatus};
pub use event_bus::EventBus;
pub use ids::{CaseId, PurchaseId, TicketId, TransactionId, UserId, VoucherId};
pub use market_event::{Funding, MarketEvent};
pub use oracle::{MatchPrediction, OracleMode, OraclePrediction, OracleRequest};
pub use payment::{PaymentForm, PaymentIntent, PaymentKind, PaymentSettings, PaymentUrls};
pub use profile::{CurrentUser, Profile, Role};
pub use purchase::{Purchase, PurchaseOutcome, Rating};
pub use ticket::{BettingSite, Ticket};
pub use ticket_draft::{AuthoringMode, FieldError, NewTicket, TicketDraft};
pub use voucher::{DailyVoucher, VoucherClaim, VoucherView};
pub use wallet::{
    BankDetails, TopUpInitiated, TransactionStatus, TransactionType, WalletSummary,
    WalletTransaction, Withdrawal, WithdrawalStatus,
};
