// src/core/registry.rs — Accounts, wallets and the GPU catalog

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::core::types::{Account, Gpu, Money, Role};
use crate::infra::clock::Clock;
use crate::infra::errors::{RentalError, Result};
use crate::store::StoreHandle;

/// Administrative operations that feed the lifecycle manager: who exists,
/// what they can pay, and which GPUs are for rent.
pub struct Registry {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
}

/// Fields for a new catalog entry.
#[derive(Debug, Clone)]
pub struct GpuListing {
    pub provider_id: String,
    pub name: String,
    pub model: String,
    pub vram_gb: u32,
    pub price_per_hour: Money,
}

impl Registry {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create an account. A generated id is used when `id` is `None`.
    pub async fn create_account(
        &self,
        id: Option<String>,
        name: &str,
        role: Role,
    ) -> Result<Account> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RentalError::InvalidInput("account name is empty".into()));
        }
        let mut account = Account::new(
            id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name,
            role,
        );
        account.created_at = self.clock.now();
        self.store.insert_account(account.clone()).await?;
        info!(user_id = %account.id, role = role.as_str(), "Account created");
        Ok(account)
    }

    pub async fn account(&self, id: &str) -> Result<Account> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| RentalError::not_found("account", id))
    }

    pub async fn deposit(&self, user_id: &str, amount: Money) -> Result<Money> {
        if !amount.is_positive() {
            return Err(RentalError::InvalidInput(format!(
                "deposit must be positive, got {amount}"
            )));
        }
        let balance = self.store.deposit(user_id, amount).await?;
        info!(user_id, amount = %amount, balance = %balance, "Wallet funded");
        Ok(balance)
    }

    pub async fn approve_provider(&self, user_id: &str) -> Result<Account> {
        let account = self.store.set_provider_approval(user_id, true).await?;
        info!(user_id, "Provider approved");
        Ok(account)
    }

    /// Suspended providers keep their running sessions but get no new ones.
    pub async fn suspend_provider(&self, user_id: &str) -> Result<Account> {
        let account = self.store.set_provider_approval(user_id, false).await?;
        info!(user_id, "Provider suspended");
        Ok(account)
    }

    pub async fn register_gpu(&self, listing: GpuListing) -> Result<Gpu> {
        validate_price(listing.price_per_hour)?;
        if listing.name.trim().is_empty() || listing.model.trim().is_empty() {
            return Err(RentalError::InvalidInput(
                "GPU name and model are required".into(),
            ));
        }
        let mut gpu = Gpu::new(
            Uuid::new_v4().to_string(),
            listing.provider_id,
            listing.name.trim(),
            listing.model.trim(),
            listing.vram_gb,
            listing.price_per_hour,
        );
        let now = self.clock.now();
        gpu.created_at = now;
        gpu.updated_at = now;
        self.store.insert_gpu(gpu.clone()).await?;
        info!(gpu_id = %gpu.id, provider_id = %gpu.provider_id, "GPU registered");
        Ok(gpu)
    }

    pub async fn gpu(&self, id: &str) -> Result<Gpu> {
        self.store
            .get_gpu(id)
            .await?
            .ok_or_else(|| RentalError::not_found("gpu", id))
    }

    pub async fn set_price(&self, gpu_id: &str, price: Money) -> Result<Gpu> {
        validate_price(price)?;
        let gpu = self
            .store
            .set_gpu_price(gpu_id, price, self.clock.now())
            .await?;
        info!(gpu_id, price = %price, "GPU price changed");
        Ok(gpu)
    }

    pub async fn deactivate_gpu(&self, gpu_id: &str) -> Result<Gpu> {
        let gpu = self.store.deactivate_gpu(gpu_id, self.clock.now()).await?;
        info!(gpu_id, "GPU deactivated");
        Ok(gpu)
    }
}

fn validate_price(price: Money) -> Result<()> {
    if price.is_positive() {
        Ok(())
    } else {
        Err(RentalError::InvalidInput(format!(
            "hourly price must be positive, got {price}"
        )))
    }
}
