//! Recipients and their mailboxes.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?\.)+[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?$",
    )
    .expect("valid regex")
});

/// RFC 5322-shaped address check with the usual length limits.
pub fn is_valid_email(candidate: &str) -> bool {
    let email = candidate.trim();
    if email.is_empty() || email.len() > MAX_ADDRESS_LEN {
        return false;
    }
    if !EMAIL_PATTERN.is_match(email) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.len() > MAX_LOCAL_LEN || domain.len() > MAX_DOMAIN_LEN || !domain.contains('.') {
        return false;
    }
    domain
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN)
}

/// Addresses parsed out of one spreadsheet-style cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmails {
    pub valid: Vec<String>,
    pub rejected: Vec<String>,
}

/// Splits a cell on `;` or the full-width `；`, trimming each entry. Empty
/// entries are dropped silently; malformed ones land in `rejected`.
pub fn parse_email_cell(cell: &str) -> ParsedEmails {
    let mut parsed = ParsedEmails::default();
    for raw in cell.split([';', '；']) {
        let address = raw.trim();
        if address.is_empty() {
            continue;
        }
        if is_valid_email(address) {
            parsed.valid.push(address.to_string());
        } else {
            parsed.rejected.push(address.to_string());
        }
    }
    parsed
}

/// Recipient name to zero or more validated addresses, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    order: Vec<String>,
    emails: HashMap<String, Vec<String>>,
    rejected: Vec<String>,
}

impl RecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `addresses` and records the survivors for `name`.
    pub fn insert<I, S>(&mut self, name: &str, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut valid = Vec::new();
        for address in addresses {
            let address = address.as_ref().trim();
            if is_valid_email(address) {
                valid.push(address.to_string());
            } else if !address.is_empty() {
                self.rejected.push(address.to_string());
            }
        }
        if !self.emails.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.emails.insert(name.to_string(), valid);
    }

    pub fn insert_cell(&mut self, name: &str, cell: &str) {
        let parsed = parse_email_cell(cell);
        self.rejected.extend(parsed.rejected);
        self.insert(name, parsed.valid);
    }

    pub fn emails_for(&self, name: &str) -> &[String] {
        self.emails.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when no recipient has any address.
    pub fn is_empty(&self) -> bool {
        self.emails.values().all(Vec::is_empty)
    }

    pub fn total_addresses(&self) -> usize {
        self.emails.values().map(Vec::len).sum()
    }

    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// Recipients with more than one mailbox, in insertion order.
    pub fn multi_mailbox(&self) -> Vec<(String, usize)> {
        self.order
            .iter()
            .filter_map(|name| {
                let count = self.emails_for(name).len();
                (count > 1).then(|| (name.clone(), count))
            })
            .collect()
    }
}
