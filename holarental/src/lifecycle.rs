//! Contract lifecycle state machine.
//!
//! [`transition`] is a pure function of the contract's current facts, the event and the party
//! triggering it. It decides the next status and the room status change that must be written
//! in the same database transaction. [`apply`] builds the updated contract row from it; the
//! repository persists that row with a `version` compare-and-set.
//!
//! ```text
//! pending ──sign×2──> signed ──deposit settled──> active ──┬─ extension ─> extension_requested ─┐
//!    │                  │                                  │ <──────────── approve / reject ─────┘
//!    └──cancel──────────┴──> cancelled                      ├─ termination ─> termination_requested ─> terminated
//!                                                           ├─ dispute ─> disputed ─> terminated | previous status (resolve, withdraw)
//!                                                           └─ end_date passed ─> expired
//! ```

use crate::api::models::contracts::ContractStatus;
use crate::api::models::rooms::RoomStatus;
use crate::db::models::contracts::ContractDBResponse;
use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use thiserror::Error;

/// Who triggers an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Tenant,
    Owner,
    Admin,
    System,
}

impl Party {
    /// The role `user_id` plays on `contract`, if any.
    pub fn of(contract: &ContractDBResponse, user_id: UserId) -> Option<Party> {
        if user_id == contract.tenant_id {
            Some(Party::Tenant)
        } else if user_id == contract.owner_id {
            Some(Party::Owner)
        } else {
            None
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Party::Tenant => "tenant",
            Party::Owner => "owner",
            Party::Admin => "admin",
            Party::System => "system",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sign,
    Cancel,
    /// The deposit was settled
    Activate,
    RequestExtension {
        requested_end_date: NaiveDate,
        note: Option<String>,
    },
    ApproveExtension,
    RejectExtension,
    RequestTermination {
        reason: String,
    },
    ConfirmTermination,
    WithdrawTermination,
    OpenDispute,
    /// The raiser withdraws; the contract goes back to `restore_to`
    WithdrawDispute {
        restore_to: ContractStatus,
    },
    /// `terminate: false` puts the contract back to `restore_to`
    ResolveDispute {
        terminate: bool,
        restore_to: ContractStatus,
    },
    Expire,
}

impl Event {
    pub fn action(&self) -> &'static str {
        match self {
            Event::Sign => "sign",
            Event::Cancel => "cancel",
            Event::Activate => "activate",
            Event::RequestExtension { .. } => "request an extension of",
            Event::ApproveExtension => "approve the extension of",
            Event::RejectExtension => "reject the extension of",
            Event::RequestTermination { .. } => "request termination of",
            Event::ConfirmTermination => "confirm termination of",
            Event::WithdrawTermination => "withdraw termination of",
            Event::OpenDispute => "dispute",
            Event::WithdrawDispute { .. } => "withdraw the dispute on",
            Event::ResolveDispute { .. } => "resolve the dispute on",
            Event::Expire => "expire",
        }
    }
}

/// What the state machine needs to know about a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facts {
    pub status: ContractStatus,
    pub tenant_signed: bool,
    pub owner_signed: bool,
    pub termination_requested_by: Option<Party>,
}

impl Facts {
    pub fn of(contract: &ContractDBResponse) -> Self {
        let termination_requested_by = contract.termination_requested_by.and_then(|id| Party::of(contract, id));
        Self {
            status: contract.status,
            tenant_signed: contract.tenant_signed_at.is_some(),
            owner_signed: contract.owner_signed_at.is_some(),
            termination_requested_by,
        }
    }
}

/// A room status compare-and-set: `from` must still hold when `to` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomChange {
    pub from: RoomStatus,
    pub to: RoomStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: ContractStatus,
    pub room: Option<RoomChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The event does not apply in the current status
    #[error("cannot {action} a contract that is {status}")]
    InvalidState { status: ContractStatus, action: &'static str },

    /// The status allows the event, but not from this party
    #[error("the {party} cannot {action} this contract")]
    NotAllowed { party: Party, action: &'static str },

    #[error("the {party} has already signed this contract")]
    AlreadySigned { party: Party },
}

const RESERVE: RoomChange = RoomChange {
    from: RoomStatus::Available,
    to: RoomStatus::Reserved,
};
const RELEASE_RESERVATION: RoomChange = RoomChange {
    from: RoomStatus::Reserved,
    to: RoomStatus::Available,
};
const OCCUPY: RoomChange = RoomChange {
    from: RoomStatus::Reserved,
    to: RoomStatus::Rented,
};
const VACATE: RoomChange = RoomChange {
    from: RoomStatus::Rented,
    to: RoomStatus::Available,
};

fn require_party(allowed: &[Party], party: Party, action: &'static str) -> Result<(), LifecycleError> {
    if allowed.contains(&party) {
        Ok(())
    } else {
        Err(LifecycleError::NotAllowed { party, action })
    }
}

/// Decide the next status for `event` triggered by `party`.
pub fn transition(facts: Facts, event: &Event, party: Party) -> Result<Outcome, LifecycleError> {
    use crate::api::models::contracts::ContractStatus as S;

    let action = event.action();
    let invalid = || LifecycleError::InvalidState {
        status: facts.status,
        action,
    };
    let to = |status: ContractStatus, room: Option<RoomChange>| -> Result<Outcome, LifecycleError> {
        Ok(Outcome { status, room })
    };

    match event {
        Event::Sign => {
            if facts.status != S::Pending {
                return Err(invalid());
            }
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            let (mine, theirs) = match party {
                Party::Tenant => (facts.tenant_signed, facts.owner_signed),
                _ => (facts.owner_signed, facts.tenant_signed),
            };
            if mine {
                return Err(LifecycleError::AlreadySigned { party });
            }
            if theirs {
                to(S::Signed, Some(RESERVE))
            } else {
                to(S::Pending, None)
            }
        }
        Event::Cancel => {
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            match facts.status {
                S::Pending => to(S::Cancelled, None),
                S::Signed => to(S::Cancelled, Some(RELEASE_RESERVATION)),
                _ => Err(invalid()),
            }
        }
        Event::Activate => {
            if facts.status != S::Signed {
                return Err(invalid());
            }
            require_party(&[Party::System], party, action)?;
            to(S::Active, Some(OCCUPY))
        }
        Event::RequestExtension { .. } => {
            if facts.status != S::Active {
                return Err(invalid());
            }
            require_party(&[Party::Tenant], party, action)?;
            to(S::ExtensionRequested, None)
        }
        Event::ApproveExtension | Event::RejectExtension => {
            if facts.status != S::ExtensionRequested {
                return Err(invalid());
            }
            require_party(&[Party::Owner], party, action)?;
            to(S::Active, None)
        }
        Event::RequestTermination { .. } => {
            if facts.status != S::Active {
                return Err(invalid());
            }
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            to(S::TerminationRequested, None)
        }
        Event::ConfirmTermination => {
            if facts.status != S::TerminationRequested {
                return Err(invalid());
            }
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            if facts.termination_requested_by == Some(party) {
                return Err(LifecycleError::NotAllowed { party, action });
            }
            to(S::Terminated, Some(VACATE))
        }
        Event::WithdrawTermination => {
            if facts.status != S::TerminationRequested {
                return Err(invalid());
            }
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            if facts.termination_requested_by != Some(party) {
                return Err(LifecycleError::NotAllowed { party, action });
            }
            to(S::Active, None)
        }
        Event::OpenDispute => {
            if !facts.status.is_running() {
                return Err(invalid());
            }
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            to(S::Disputed, None)
        }
        Event::WithdrawDispute { restore_to } => {
            if facts.status != S::Disputed || !restore_to.is_running() {
                return Err(invalid());
            }
            require_party(&[Party::Tenant, Party::Owner], party, action)?;
            to(*restore_to, None)
        }
        Event::ResolveDispute { terminate, restore_to } => {
            if facts.status != S::Disputed {
                return Err(invalid());
            }
            require_party(&[Party::Admin], party, action)?;
            if *terminate {
                to(S::Terminated, Some(VACATE))
            } else if restore_to.is_running() {
                to(*restore_to, None)
            } else {
                Err(invalid())
            }
        }
        Event::Expire => {
            if !facts.status.is_running() {
                return Err(invalid());
            }
            require_party(&[Party::System], party, action)?;
            to(S::Expired, Some(VACATE))
        }
    }
}

/// The contract row after the event, and the room change to write with it.
#[derive(Debug, Clone)]
pub struct Applied {
    pub contract: ContractDBResponse,
    pub room: Option<RoomChange>,
}

/// Run [`transition`] and stamp the event's fields onto a copy of the contract.
pub fn apply(
    contract: &ContractDBResponse,
    event: &Event,
    party: Party,
    actor: Option<UserId>,
    now: DateTime<Utc>,
) -> Result<Applied, LifecycleError> {
    let outcome = transition(Facts::of(contract), event, party)?;
    let mut next = contract.clone();
    next.status = outcome.status;

    match event {
        Event::Sign => match party {
            Party::Tenant => next.tenant_signed_at = Some(now),
            _ => next.owner_signed_at = Some(now),
        },
        Event::Cancel => next.cancelled_by = actor,
        Event::RequestExtension {
            requested_end_date,
            note,
        } => {
            next.requested_end_date = Some(*requested_end_date);
            next.extension_note = note.clone();
        }
        Event::ApproveExtension => {
            if let Some(requested) = next.requested_end_date.take() {
                next.end_date = requested;
            }
        }
        Event::RejectExtension => next.requested_end_date = None,
        Event::RequestTermination { reason } => {
            next.termination_requested_by = actor;
            next.termination_reason = Some(reason.clone());
        }
        Event::WithdrawTermination => {
            next.termination_requested_by = None;
            next.termination_reason = None;
        }
        Event::ConfirmTermination => next.terminated_at = Some(now),
        Event::ResolveDispute { terminate: true, .. } => next.terminated_at = Some(now),
        Event::Activate
        | Event::OpenDispute
        | Event::WithdrawDispute { .. }
        | Event::ResolveDispute { .. }
        | Event::Expire => {}
    }

    Ok(Applied {
        contract: next,
        room: outcome.room,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::contracts::ContractStatus as S;
    use uuid::Uuid;

    fn facts(status: ContractStatus) -> Facts {
        Facts {
            status,
            tenant_signed: false,
            owner_signed: false,
            termination_requested_by: None,
        }
    }

    fn contract(status: ContractStatus) -> ContractDBResponse {
        let now = Utc::now();
        ContractDBResponse {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            start_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
            monthly_rent: 3_500_000,
            deposit_amount: 3_500_000,
            terms: None,
            status,
            tenant_signed_at: None,
            owner_signed_at: None,
            requested_end_date: None,
            extension_note: None,
            termination_requested_by: None,
            termination_reason: None,
            terminated_at: None,
            cancelled_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_first_signature_keeps_pending_second_reserves_room() {
        let first = transition(facts(S::Pending), &Event::Sign, Party::Tenant).unwrap();
        assert_eq!(first, Outcome { status: S::Pending, room: None });

        let half_signed = Facts {
            tenant_signed: true,
            ..facts(S::Pending)
        };
        let second = transition(half_signed, &Event::Sign, Party::Owner).unwrap();
        assert_eq!(second.status, S::Signed);
        assert_eq!(second.room, Some(RESERVE));
    }

    #[test]
    fn test_each_party_signs_once() {
        let half_signed = Facts {
            tenant_signed: true,
            ..facts(S::Pending)
        };
        assert_eq!(
            transition(half_signed, &Event::Sign, Party::Tenant),
            Err(LifecycleError::AlreadySigned { party: Party::Tenant })
        );
        assert!(matches!(
            transition(facts(S::Pending), &Event::Sign, Party::Admin),
            Err(LifecycleError::NotAllowed { .. })
        ));
        assert!(matches!(
            transition(facts(S::Signed), &Event::Sign, Party::Owner),
            Err(LifecycleError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_cancel_releases_reservation_only_when_signed() {
        assert_eq!(
            transition(facts(S::Pending), &Event::Cancel, Party::Owner).unwrap().room,
            None
        );
        assert_eq!(
            transition(facts(S::Signed), &Event::Cancel, Party::Tenant).unwrap().room,
            Some(RELEASE_RESERVATION)
        );
        assert!(transition(facts(S::Active), &Event::Cancel, Party::Tenant).is_err());
    }

    #[test]
    fn test_only_the_system_activates() {
        let outcome = transition(facts(S::Signed), &Event::Activate, Party::System).unwrap();
        assert_eq!(outcome.status, S::Active);
        assert_eq!(outcome.room, Some(OCCUPY));
        assert!(matches!(
            transition(facts(S::Signed), &Event::Activate, Party::Tenant),
            Err(LifecycleError::NotAllowed { .. })
        ));
        assert!(transition(facts(S::Pending), &Event::Activate, Party::System).is_err());
    }

    #[test]
    fn test_extension_round_trip() {
        let request = Event::RequestExtension {
            requested_end_date: NaiveDate::from_ymd_opt(2027, 7, 1).unwrap(),
            note: Some("Thêm 6 tháng".to_string()),
        };
        assert!(transition(facts(S::Active), &request, Party::Owner).is_err());

        let c = contract(S::Active);
        let requested = apply(&c, &request, Party::Tenant, Some(c.tenant_id), Utc::now()).unwrap();
        assert_eq!(requested.contract.status, S::ExtensionRequested);

        let approved = apply(&requested.contract, &Event::ApproveExtension, Party::Owner, None, Utc::now()).unwrap();
        assert_eq!(approved.contract.status, S::Active);
        assert_eq!(approved.contract.end_date, NaiveDate::from_ymd_opt(2027, 7, 1).unwrap());
        assert_eq!(approved.contract.requested_end_date, None);

        let rejected = apply(&requested.contract, &Event::RejectExtension, Party::Owner, None, Utc::now()).unwrap();
        assert_eq!(rejected.contract.end_date, c.end_date);
        assert!(apply(&requested.contract, &Event::ApproveExtension, Party::Tenant, None, Utc::now()).is_err());
    }

    #[test]
    fn test_termination_is_confirmed_by_the_other_party() {
        let c = contract(S::Active);
        let event = Event::RequestTermination {
            reason: "Chuyển công tác".to_string(),
        };
        let requested = apply(&c, &event, Party::Tenant, Some(c.tenant_id), Utc::now()).unwrap();
        assert_eq!(requested.contract.status, S::TerminationRequested);

        let facts = Facts::of(&requested.contract);
        assert_eq!(facts.termination_requested_by, Some(Party::Tenant));
        assert!(matches!(
            transition(facts, &Event::ConfirmTermination, Party::Tenant),
            Err(LifecycleError::NotAllowed { .. })
        ));
        let confirmed = transition(facts, &Event::ConfirmTermination, Party::Owner).unwrap();
        assert_eq!(confirmed.status, S::Terminated);
        assert_eq!(confirmed.room, Some(VACATE));

        assert!(transition(facts, &Event::WithdrawTermination, Party::Owner).is_err());
        let withdrawn = apply(&requested.contract, &Event::WithdrawTermination, Party::Tenant, None, Utc::now()).unwrap();
        assert_eq!(withdrawn.contract.status, S::Active);
        assert_eq!(withdrawn.contract.termination_reason, None);
    }

    #[test]
    fn test_disputes_open_from_running_statuses_only() {
        for status in [S::Active, S::ExtensionRequested, S::TerminationRequested] {
            let outcome = transition(facts(status), &Event::OpenDispute, Party::Owner).unwrap();
            assert_eq!(outcome.status, S::Disputed);
        }
        for status in [S::Pending, S::Signed, S::Disputed, S::Expired] {
            assert!(transition(facts(status), &Event::OpenDispute, Party::Tenant).is_err(), "{status}");
        }
    }

    #[test]
    fn test_dispute_resolution_restores_or_terminates() {
        let restore = Event::ResolveDispute {
            terminate: false,
            restore_to: S::ExtensionRequested,
        };
        assert_eq!(
            transition(facts(S::Disputed), &restore, Party::Admin).unwrap(),
            Outcome {
                status: S::ExtensionRequested,
                room: None
            }
        );
        let terminate = Event::ResolveDispute {
            terminate: true,
            restore_to: S::Active,
        };
        assert_eq!(
            transition(facts(S::Disputed), &terminate, Party::Admin).unwrap().room,
            Some(VACATE)
        );
        assert!(transition(facts(S::Disputed), &terminate, Party::Tenant).is_err());
    }

    #[test]
    fn test_withdrawn_dispute_restores_previous_status() {
        let withdraw = Event::WithdrawDispute {
            restore_to: S::TerminationRequested,
        };
        assert_eq!(
            transition(facts(S::Disputed), &withdraw, Party::Tenant).unwrap().status,
            S::TerminationRequested
        );
        assert!(transition(facts(S::Disputed), &withdraw, Party::Admin).is_err());
        assert!(transition(facts(S::Active), &withdraw, Party::Tenant).is_err());
        let bogus = Event::WithdrawDispute { restore_to: S::Pending };
        assert!(transition(facts(S::Disputed), &bogus, Party::Owner).is_err());
    }

    #[test]
    fn test_expiry() {
        for status in [S::Active, S::ExtensionRequested, S::TerminationRequested] {
            assert_eq!(
                transition(facts(status), &Event::Expire, Party::System).unwrap().status,
                S::Expired
            );
        }
        assert!(transition(facts(S::Disputed), &Event::Expire, Party::System).is_err());
        assert!(transition(facts(S::Active), &Event::Expire, Party::Owner).is_err());
    }

    #[test]
    fn test_terminal_statuses_accept_nothing() {
        let events = [
            Event::Sign,
            Event::Cancel,
            Event::Activate,
            Event::ApproveExtension,
            Event::ConfirmTermination,
            Event::OpenDispute,
            Event::Expire,
        ];
        for status in [S::Terminated, S::Cancelled, S::Expired] {
            for event in &events {
                for party in [Party::Tenant, Party::Owner, Party::Admin, Party::System] {
                    assert!(transition(facts(status), event, party).is_err(), "{status} {event:?} {party}");
                }
            }
        }
    }

    #[test]
    fn test_error_messages_name_status_and_action() {
        let err = transition(facts(S::Expired), &Event::Cancel, Party::Tenant).unwrap_err();
        assert_eq!(err.to_string(), "cannot cancel a contract that is expired");
    }
}
