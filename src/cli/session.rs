// src/cli/session.rs — `gpurent session ...`

use crate::cli::SessionAction;
use crate::core::telemetry::MetricSample;
use crate::core::types::{Actor, Session};
use crate::core::RentalCore;

pub async fn run_session(
    core: &RentalCore,
    actor: &Actor,
    action: SessionAction,
) -> anyhow::Result<()> {
    let sessions = &core.sessions;
    match action {
        SessionAction::Request { gpu, workload } => {
            if actor.is_admin() {
                anyhow::bail!("Pass --as <consumer id> to request a session");
            }
            let session = sessions.request_session(actor, &gpu, workload).await?;
            println!("Requested session {}", session.id);
            print_session(&session);
        }
        SessionAction::Start { id } => {
            let session = sessions.start_session(&id, actor).await?;
            println!("Session {} started", session.id);
            print_session(&session);
        }
        SessionAction::Stop { id } => {
            let stopped = sessions.stop_session(&id, actor).await?;
            println!("Session {} stopped: {}", stopped.session.id, stopped.billing);
            print_session(&stopped.session);
        }
        SessionAction::Cancel { id, reason } => {
            let session = sessions.cancel_session(&id, actor, reason.as_deref()).await?;
            println!("Session {} cancelled", session.id);
            print_session(&session);
        }
        SessionAction::Show { id } => {
            print_session(&sessions.get_session(&id, actor).await?);
        }
        SessionAction::List { user } => {
            let user = user.unwrap_or_else(|| actor.user_id.clone());
            let list = sessions.list_sessions(actor, &user).await?;
            if list.is_empty() {
                println!("No sessions for {user}.");
            }
            for s in &list {
                println!(
                    "  {}  {:<10}  gpu {}  {}/h  cost {}  {} min",
                    s.id, s.status, s.gpu_id, s.hourly_rate, s.total_cost, s.duration_minutes
                );
            }
        }
        SessionAction::Metrics { id } => {
            let m = sessions.metrics_summary(&id, actor).await?;
            println!("Samples:      {}", m.samples);
            println!("Utilization:  {}%", m.avg_utilization);
            println!("Temperature:  {}°C", m.avg_temperature);
            println!("Memory used:  {} MB", m.avg_memory_used);
            if let Some(at) = m.last_updated {
                println!("Last update:  {}", at.to_rfc3339());
            }
        }
        SessionAction::RecordMetrics {
            id,
            utilization,
            temperature,
            memory,
        } => {
            let sample = MetricSample {
                gpu_utilization: utilization,
                temperature,
                memory_used: memory,
            };
            let session = sessions.record_metrics(&id, actor, sample).await?;
            println!(
                "Recorded sample ({} kept)",
                session.metrics.len()
            );
        }
        SessionAction::Finalize { id } => {
            let outcome = sessions.finalize_session(&id, actor).await?;
            println!("Session {id}: {outcome}");
        }
        SessionAction::Ledger { id } => {
            let entries = sessions.ledger_entries(&id, actor).await?;
            if entries.is_empty() {
                println!("No ledger entries for {id}.");
            }
            for e in &entries {
                println!(
                    "  #{:<4} {:<8} {:>10}  {} min  {}",
                    e.id,
                    e.kind,
                    e.amount.to_string(),
                    e.minutes,
                    e.created_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

pub fn print_session(s: &Session) {
    println!("  Status:     {}", s.status);
    println!("  GPU:        {} (provider {})", s.gpu_id, s.provider_id);
    println!("  Consumer:   {}", s.consumer_id);
    println!("  Workload:   {}", s.workload_type.as_str());
    println!("  Rate:       {}/h, billed every {} min", s.hourly_rate, s.billing_interval_minutes);
    if let Some(start) = s.start_time {
        println!("  Started:    {}", start.to_rfc3339());
    }
    if let Some(end) = s.end_time {
        println!("  Ended:      {}", end.to_rfc3339());
    }
    println!("  Billed:     {} for {} min", s.total_cost, s.duration_minutes);
    if s.unbilled_cost.is_positive() {
        println!("  Unbilled:   {}", s.unbilled_cost);
    }
    if let Some(c) = &s.connection {
        println!("  Connect:    {}:{} token {}", c.host, c.port, c.access_token);
    }
    if let Some(r) = s.cancellation_reason.as_deref().or(s.termination_reason.as_deref()) {
        println!("  Reason:     {r}");
    }
}
