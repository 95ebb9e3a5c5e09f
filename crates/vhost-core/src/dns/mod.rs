// # DNS
//
// Everything the engine needs to get a domain's A-record pointing at this
// host:
//
// - `manual`: the provider used when no backend can change records
// - `resolver`: system and authoritative (cache-free) resolvers
// - `waiter`: blocking poll until a record shows the expected address
// - `check`: compare, update and confirm in one step

pub mod check;
pub mod manual;
pub mod resolver;
pub mod waiter;

pub use check::{DnsCheck, DnsStatus};
pub use manual::{ManualFactory, ManualProvider};
pub use resolver::{AuthoritativeResolver, SystemResolver};
pub use waiter::{DnsWaiter, WaitOutcome};
