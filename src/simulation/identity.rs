//! Name pools and random identity fields for mock transactions.

use rand::Rng;
use rand::seq::IndexedRandom;
use std::net::Ipv4Addr;

pub const FIRST_NAMES: &[&str] = &[
    "duncan", "santosh", "darren", "jeremy", "ryoji", "steve", "doug", "alan", "john", "jim",
];

pub const LAST_NAMES: &[&str] = &[
    "sommerville",
    "krishna",
    "fuller",
    "adams",
    "betchaku",
    "manuel",
    "brown",
    "burns",
    "tobin",
    "liu",
];

pub const EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "solsys.ca",
    "yahoo.ca",
    "hotmail.com",
    "mail.com",
    "aol.com",
];

pub const OAUTH_CLIENTS: &[&str] = &[
    "analyzer",
    "portal",
    "api",
    "solsys_connect",
    "connect_api",
    "plethora",
    "solsys_showcase",
    "datafy",
    "conceptr",
    "jira",
    "remedy",
    "cloudera",
    "aws",
    "azure",
    "gcp",
    "fortify",
    "bitbucket",
];

pub const ADAPTERS: &[&str] = &[
    "HTMLFormSimplePCV",
    "LDAPAuthenticator",
    "KerberosAuthenticator",
    "IWAAuth",
];

/// Private and link-local networks source addresses are drawn from.
pub const SUBNETS: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
];

pub const TRANSACTION_ID_LEN: usize = 27;
const TRANSACTION_ID_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

fn pick<R: Rng + ?Sized>(rng: &mut R, pool: &'static [&'static str]) -> &'static str {
    pool.choose(rng).copied().unwrap_or_default()
}

pub fn transaction_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TRANSACTION_ID_LEN)
        .map(|_| TRANSACTION_ID_ALPHABET[rng.random_range(0..TRANSACTION_ID_ALPHABET.len())] as char)
        .collect()
}

pub fn user<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{}.{}@{}",
        pick(rng, FIRST_NAMES),
        pick(rng, LAST_NAMES),
        pick(rng, EMAIL_DOMAINS)
    )
}

/// A uniformly random address inside one of [`SUBNETS`].
pub fn ip_address<R: Rng + ?Sized>(rng: &mut R) -> Ipv4Addr {
    let (network, prefix) = SUBNETS[rng.random_range(0..SUBNETS.len())];
    let host_mask = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
    let host_bits = rng.random::<u32>() & host_mask;
    Ipv4Addr::from(u32::from(network) | host_bits)
}

/// Identity of one simulated transaction. Regenerated every iteration.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub transaction_id: String,
    pub user: String,
    pub source_ip: Ipv4Addr,
    pub client: &'static str,
    pub host: String,
    pub adapter: &'static str,
}

impl TransactionContext {
    /// Draw a fresh identity, with the host picked from `hosts`.
    pub fn scramble<R: Rng + ?Sized>(rng: &mut R, hosts: &[String]) -> Option<Self> {
        let host = hosts.choose(rng)?.clone();
        Some(Self {
            transaction_id: transaction_id(rng),
            user: user(rng),
            source_ip: ip_address(rng),
            client: pick(rng, OAUTH_CLIENTS),
            host,
            adapter: pick(rng, ADAPTERS),
        })
    }
}
