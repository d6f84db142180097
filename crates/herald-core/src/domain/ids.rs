//! Domain identifiers (strongly-typed IDs).
//!
//! - `RecordId`: store が insert 時に採番する単調増加の ID
//! - `ClaimToken` / `RelayId`: ULID ベース。Phantom type で型を分ける
//!
//! ULID は時刻でソート可能で、調整なしに複数ノードで生成できます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Identifier of an outbox record, assigned by the store on insert.
///
/// Monotonic within one store; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outbox-{}", self.0)
    }
}

/// IdMarker は ULID ベースの ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "claim-", "relay-"）
    fn prefix() -> &'static str;
}

/// ULID ベースのジェネリック ID 型
///
/// `T` は PhantomData で、コンパイル時の型安全性だけを提供します。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Claim のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Claim {}

impl IdMarker for Claim {
    fn prefix() -> &'static str {
        "claim-"
    }
}

/// Relay のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relay {}

impl IdMarker for Relay {
    fn prefix() -> &'static str {
        "relay-"
    }
}

/// Token a poller writes onto a pending record before sending it.
pub type ClaimToken = Id<Claim>;

/// Identity of one relay poller instance (logs and claims).
pub type RelayId = Id<Relay>;
