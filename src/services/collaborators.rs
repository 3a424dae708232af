//! Contracts for external collaborators the game server depends on but does
//! not own: the coin wallet and the voice SFU. Only the seams live here;
//! production implementations sit in their own services.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ServiceError;

/// Wallet seam: entry fees, voice fees, and end-of-game rewards.
pub trait CoinWallet: Send + Sync {
    fn balance(&self, user_id: i64) -> BoxFuture<'static, Result<i64, ServiceError>>;
    /// Debit exactly `amount`; fails with `insufficient_coins` when the
    /// balance does not cover it.
    fn debit(&self, user_id: i64, amount: i64) -> BoxFuture<'static, Result<(), ServiceError>>;
    fn credit(&self, user_id: i64, amount: i64) -> BoxFuture<'static, Result<(), ServiceError>>;
}

/// Opaque voice SFU seam; payloads pass through untouched.
pub trait VoiceRelay: Send + Sync {
    fn join(&self, room_id: i64, user_id: i64) -> BoxFuture<'static, Result<Value, ServiceError>>;
    fn create_transport(
        &self,
        room_id: i64,
        user_id: i64,
        payload: Value,
    ) -> BoxFuture<'static, Result<Value, ServiceError>>;
    fn produce(
        &self,
        room_id: i64,
        user_id: i64,
        payload: Value,
    ) -> BoxFuture<'static, Result<Value, ServiceError>>;
    fn consume(
        &self,
        room_id: i64,
        user_id: i64,
        payload: Value,
    ) -> BoxFuture<'static, Result<Value, ServiceError>>;
}

/// In-process wallet used by tests and local development.
pub struct MemoryWallet {
    balances: DashMap<i64, i64>,
    default_balance: i64,
}

impl MemoryWallet {
    pub fn with_default_balance(default_balance: i64) -> Self {
        Self {
            balances: DashMap::new(),
            default_balance,
        }
    }

    pub fn set_balance(&self, user_id: i64, amount: i64) {
        self.balances.insert(user_id, amount);
    }

    fn current(&self, user_id: i64) -> i64 {
        *self
            .balances
            .entry(user_id)
            .or_insert(self.default_balance)
    }
}

impl CoinWallet for MemoryWallet {
    fn balance(&self, user_id: i64) -> BoxFuture<'static, Result<i64, ServiceError>> {
        let balance = self.current(user_id);
        Box::pin(async move { Ok(balance) })
    }

    fn debit(&self, user_id: i64, amount: i64) -> BoxFuture<'static, Result<(), ServiceError>> {
        let current = self.current(user_id);
        if current < amount {
            return Box::pin(async { Err(ServiceError::InsufficientCoins) });
        }
        self.balances.insert(user_id, current - amount);
        Box::pin(async { Ok(()) })
    }

    fn credit(&self, user_id: i64, amount: i64) -> BoxFuture<'static, Result<(), ServiceError>> {
        let current = self.current(user_id);
        self.balances.insert(user_id, current + amount);
        Box::pin(async { Ok(()) })
    }
}

/// Voice relay that acknowledges every request without a backing SFU.
pub struct NullVoiceRelay;

impl VoiceRelay for NullVoiceRelay {
    fn join(&self, _room_id: i64, _user_id: i64) -> BoxFuture<'static, Result<Value, ServiceError>> {
        Box::pin(async { Ok(Value::Null) })
    }

    fn create_transport(
        &self,
        _room_id: i64,
        _user_id: i64,
        _payload: Value,
    ) -> BoxFuture<'static, Result<Value, ServiceError>> {
        Box::pin(async { Ok(Value::Null) })
    }

    fn produce(
        &self,
        _room_id: i64,
        _user_id: i64,
        _payload: Value,
    ) -> BoxFuture<'static, Result<Value, ServiceError>> {
        Box::pin(async { Ok(Value::Null) })
    }

    fn consume(
        &self,
        _room_id: i64,
        _user_id: i64,
        _payload: Value,
    ) -> BoxFuture<'static, Result<Value, ServiceError>> {
        Box::pin(async { Ok(Value::Null) })
    }
}
