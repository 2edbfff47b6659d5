use crate::bitrix::CrmApi;
use crate::error::AppError;
use crate::phone::normalize_phone;

use std::cmp::Reverse;

/// Which strategy this deployment uses to match a canonical phone number to
/// a CRM entity.  One deployment runs exactly one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Contact by phone, then that contact's in-progress deal owned by the
    /// calling agent.
    ContactDeal,
    /// `crm.duplicate.findbycomm` candidates, filtered to an exact canonical
    /// phone match; leads are the fallback.
    DuplicateFinder,
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "contact-deal" => Ok(Self::ContactDeal),
            "duplicate-finder" => Ok(Self::DuplicateFinder),
            other => Err(AppError::with_detail(
                "unknown-resolution-strategy",
                other.to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrmEntity {
    Contact {
        id: i64,
        name: String,
    },
    Lead {
        id: i64,
    },
    Deal {
        id: i64,
        title: String,
        contact_id: i64,
        contact_name: String,
    },
}

/// Resolution misses are expected, terminal outcomes — not errors.
#[derive(Debug, PartialEq)]
pub enum Resolution {
    Entity(CrmEntity),
    NoContact,
    NoDeal,
}

pub async fn resolve(
    crm: &dyn CrmApi,
    strategy: ResolutionStrategy,
    phone: &str,
    responsible_user_id: i64,
) -> Result<Resolution, AppError> {
    match strategy {
        ResolutionStrategy::ContactDeal => resolve_contact_deal(crm, phone, responsible_user_id).await,
        ResolutionStrategy::DuplicateFinder => resolve_duplicate_finder(crm, phone).await,
    }
}

async fn resolve_contact_deal(
    crm: &dyn CrmApi,
    phone: &str,
    responsible_user_id: i64,
) -> Result<Resolution, AppError> {
    let contacts = crm.find_contacts_by_phone(phone).await?;
    let Some(contact) = contacts.into_iter().next() else {
        return Ok(Resolution::NoContact);
    };
    let contact_id = contact.id_num()?;

    // The remote filter already constrains owner and stage, but partial
    // phone matches have returned stray rows before: re-check ownership,
    // then take the newest deal deterministically.
    let mut deals: Vec<_> = crm
        .find_open_deals(contact_id, responsible_user_id)
        .await?
        .into_iter()
        .filter(|deal| deal.assigned_to(responsible_user_id))
        .collect();
    deals.sort_by_key(|deal| Reverse(deal.id_num().unwrap_or(0)));

    match deals.into_iter().next() {
        Some(deal) => Ok(Resolution::Entity(CrmEntity::Deal {
            id: deal.id_num()?,
            title: deal.title.clone().unwrap_or_default(),
            contact_id,
            contact_name: contact.display_name().to_string(),
        })),
        None => Ok(Resolution::NoDeal),
    }
}

async fn resolve_duplicate_finder(crm: &dyn CrmApi, phone: &str) -> Result<Resolution, AppError> {
    let matches = crm.find_duplicates_by_phone(phone).await?;

    // The duplicate finder matches on substrings; require an exact canonical
    // phone on the candidate itself before trusting it.
    for contact_id in &matches.contact {
        let Some(contact) = crm.get_contact(*contact_id).await? else {
            continue;
        };
        let exact = contact
            .phone_values()
            .any(|candidate| normalize_phone(candidate, None) == phone);
        if exact {
            return Ok(Resolution::Entity(CrmEntity::Contact {
                id: *contact_id,
                name: contact.display_name().to_string(),
            }));
        }
    }

    match matches.lead.first() {
        Some(lead_id) => Ok(Resolution::Entity(CrmEntity::Lead { id: *lead_id })),
        None => Ok(Resolution::NoContact),
    }
}
