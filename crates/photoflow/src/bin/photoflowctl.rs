use std::env;

use photoflow::db;
use photoflow::jobs::error_codes::suggested_action;
use photoflow::jobs::{JobStore, PgJobStore};
use photoflow::ledger::{CreditLedger, LedgerReference, PgCreditLedger};
use photoflow::payments::{NewPayment, PaymentStore, PgPaymentStore};
use sqlx::PgPool;
use uuid::Uuid;

const USAGE: &str = "photoflowctl <command>\n\
Commands:\n\
- reset\n\
- grant <user_id> <credits> <reference>\n\
- balance <user_id>\n\
- job <job_id>\n\
- stale [limit]\n\
- register-payment <provider_payment_id> <user_id> <amount_cents> <credits>\n\
\n\
Uses DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;
    let pool = db::make_pool(&url).await?;

    match args[1].as_str() {
        "reset" => reset(&pool).await?,
        "grant" => {
            let user = arg(&args, 2, "grant <user_id> <credits> <reference>")?;
            let credits: i64 = arg(&args, 3, "grant <user_id> <credits> <reference>")?.parse()?;
            let reference = arg(&args, 4, "grant <user_id> <credits> <reference>")?;
            let ledger = PgCreditLedger::new(pool.clone());
            let balance = ledger
                .credit(user, credits, &LedgerReference::grant(reference))
                .await?;
            println!("granted {credits} to {user}; balance={balance}");
        }
        "balance" => {
            let user = arg(&args, 2, "balance <user_id>")?;
            let ledger = PgCreditLedger::new(pool.clone());
            println!("balance={}", ledger.balance(user).await?);
            for e in ledger.history(user, 20).await? {
                println!(
                    "{}  {:>6}  -> {:>6}  {}:{}",
                    e.created_at.to_rfc3339(),
                    e.delta,
                    e.balance_after,
                    e.entry_kind,
                    e.reference_id
                );
            }
        }
        "job" => {
            let job_id: Uuid = arg(&args, 2, "job <job_id>")?.parse()?;
            print_job(&pool, job_id).await?;
        }
        "stale" => {
            let limit: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(50);
            print_stale(&pool, limit).await?;
        }
        "register-payment" => {
            let usage = "register-payment <provider_payment_id> <user_id> <amount_cents> <credits>";
            let payments = PgPaymentStore::new(pool.clone());
            let rec = payments
                .register_pending(&NewPayment {
                    provider_payment_id: arg(&args, 2, usage)?.to_string(),
                    owner_id: arg(&args, 3, usage)?.to_string(),
                    amount_cents: arg(&args, 4, usage)?.parse()?,
                    credits: arg(&args, 5, usage)?.parse()?,
                })
                .await?;
            println!(
                "payment {} ({}) for {}: {} credits, status={}",
                rec.id, rec.provider_payment_id, rec.owner_id, rec.credits, rec.status
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], i: usize, usage: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: photoflowctl {usage}"))
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            ledger_entries,
            credit_accounts,
            idempotency_keys,
            payments,
            jobs
        CASCADE
        "#,
    )
    .execute(pool)
    .await?;

    println!("reset OK");
    Ok(())
}

async fn print_job(pool: &PgPool, job_id: Uuid) -> anyhow::Result<()> {
    let jobs = PgJobStore::new(pool.clone());
    let Some(job) = jobs.get(job_id).await? else {
        println!("job {job_id} not found");
        return Ok(());
    };

    println!("job        {}", job.id);
    println!("owner      {}", job.owner_id);
    println!("kind       {}", job.kind);
    println!("status     {}", job.status);
    println!("external   {}", job.external_job_ref.as_deref().unwrap_or("-"));
    println!("input      {}", job.input_ref);
    println!("output     {}", job.output_ref.as_deref().unwrap_or("-"));
    println!(
        "charged    {}",
        job.credits_charged
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("polls      {}", job.poll_attempts);
    println!("created    {}", job.created_at.to_rfc3339());
    println!("updated    {}", job.updated_at.to_rfc3339());

    if let Some(code) = &job.error_code {
        println!("error      {code}: {}", job.error_message.as_deref().unwrap_or(""));
        println!("action     {}", suggested_action(code));
    }
    Ok(())
}

async fn print_stale(pool: &PgPool, limit: i64) -> anyhow::Result<()> {
    let rows = sqlx::query_as::<_, (Uuid, String, Option<String>, i32, Option<chrono::DateTime<chrono::Utc>>)>(
        r#"
        SELECT id, owner_id, external_job_ref, poll_attempts, next_poll_at
        FROM jobs
        WHERE status = 'generating'
        ORDER BY next_poll_at ASC NULLS FIRST
        LIMIT $1
        "#,
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        println!("no generating jobs");
        return Ok(());
    }
    for (id, owner, ext, attempts, next_poll_at) in rows {
        println!(
            "{id}  owner={owner}  ext={}  polls={attempts}  next_poll_at={}",
            ext.as_deref().unwrap_or("-"),
            next_poll_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}
