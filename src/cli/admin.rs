// src/cli/admin.rs — `gpurent account ...` and `gpurent gpu ...`

use crate::cli::{AccountAction, GpuAction};
use crate::core::registry::GpuListing;
use crate::core::types::{Account, Gpu};
use crate::core::RentalCore;

pub async fn run_account(core: &RentalCore, action: AccountAction) -> anyhow::Result<()> {
    let registry = &core.registry;
    match action {
        AccountAction::Create { name, role, id } => {
            let account = registry.create_account(id, &name, role).await?;
            println!("Created {} account {}", role.as_str(), account.id);
        }
        AccountAction::Deposit { user, amount } => {
            let balance = registry.deposit(&user, amount).await?;
            println!("Deposited {amount} to {user}; balance {balance}");
        }
        AccountAction::Approve { user } => {
            registry.approve_provider(&user).await?;
            println!("Provider {user} approved");
        }
        AccountAction::Suspend { user } => {
            registry.suspend_provider(&user).await?;
            println!("Provider {user} suspended");
        }
        AccountAction::Show { user } => {
            print_account(&registry.account(&user).await?);
        }
    }
    Ok(())
}

pub async fn run_gpu(core: &RentalCore, action: GpuAction) -> anyhow::Result<()> {
    let registry = &core.registry;
    match action {
        GpuAction::Register {
            provider,
            name,
            model,
            vram,
            price,
        } => {
            let gpu = registry
                .register_gpu(GpuListing {
                    provider_id: provider,
                    name,
                    model,
                    vram_gb: vram,
                    price_per_hour: price,
                })
                .await?;
            println!("Registered GPU {}", gpu.id);
            print_gpu(&gpu);
        }
        GpuAction::Price { gpu, price } => {
            let gpu = registry.set_price(&gpu, price).await?;
            println!("GPU {} now rents at {}/h", gpu.id, gpu.price_per_hour);
        }
        GpuAction::Deactivate { gpu } => {
            let gpu = registry.deactivate_gpu(&gpu).await?;
            println!("GPU {} deactivated", gpu.id);
        }
        GpuAction::Show { gpu } => {
            print_gpu(&registry.gpu(&gpu).await?);
        }
    }
    Ok(())
}

fn print_account(a: &Account) {
    println!("  Id:         {}", a.id);
    println!("  Name:       {}", a.name);
    println!("  Role:       {}", a.role.as_str());
    println!("  Balance:    {}", a.wallet_balance);
    if a.role == crate::core::types::Role::Provider {
        let state = if a.is_provider_approved {
            "approved"
        } else {
            "not approved"
        };
        println!("  Provider:   {state}");
    }
}

fn print_gpu(g: &Gpu) {
    println!("  Name:       {} ({}, {} GB)", g.name, g.model, g.vram_gb);
    println!("  Provider:   {}", g.provider_id);
    println!("  Price:      {}/h", g.price_per_hour);
    let state = match (g.is_active, g.is_available) {
        (false, _) => "inactive",
        (true, true) => "available",
        (true, false) => "rented",
    };
    println!("  State:      {state}");
    if let Some(s) = &g.current_session {
        println!("  Session:    {s}");
    }
    println!(
        "  Earned:     {} over {:.1} h",
        g.total_earnings,
        g.total_hours_rented()
    );
}
