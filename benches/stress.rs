use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

/// Bookable hours per day, 08:00-22:00.
const FIRST_HOUR: u64 = 8;
const HOURS_PER_DAY: u64 = 14;

async fn connect(host: &str, port: u16, password: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("slotguard")
        .user("bench")
        .password(password);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Day and hour for the n-th one-hour slot of a court's calendar.
fn slot(epoch: NaiveDate, n: u64) -> (NaiveDate, u64) {
    let day = epoch + Days::new(n / HOURS_PER_DAY);
    (day, FIRST_HOUR + n % HOURS_PER_DAY)
}

fn booking_sql(resource_id: i64, day: NaiveDate, hour: u64, customer: i64) -> String {
    format!(
        r#"INSERT INTO bookings (resource_id, customer_id, day, start, "end", channel) VALUES ({resource_id}, {customer}, '{day}', '{hour:02}:00', '{:02}:00', 'online')"#,
        hour + 1
    )
}

async fn setup(client: &tokio_postgres::Client, base: i64, n: i64) -> Vec<i64> {
    let mut courts = Vec::new();
    for id in base..base + n {
        client
            .batch_execute(&format!(
                "INSERT INTO resources (id, category, facility_id) VALUES ({id}, 'bench', 1)"
            ))
            .await
            .unwrap();
        courts.push(id);
    }
    println!("  created {} courts", courts.len());
    courts
}

async fn phase1_sequential(host: &str, port: u16, pw: &str, court: i64, epoch: NaiveDate) {
    let client = connect(host, port, pw).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let (day, hour) = slot(epoch, i);
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(court, day, hour, i as i64))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same slots; each slot must have exactly one winner.
async fn phase2_contention(host: &str, port: u16, pw: &str, court: i64, epoch: NaiveDate) {
    let n_clients = 16;
    let n_slots = 200;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for c in 0..n_clients {
        let host = host.to_string();
        let pw = pw.to_string();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &pw).await;
            for i in 0..n_slots {
                let (day, hour) = slot(epoch, i);
                match client.simple_query(&booking_sql(court, day, hour, c)).await {
                    Ok(_) => {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code().map(|s| s.code()) == Some("23P01") => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => eprintln!("  unexpected error: {e}"),
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {n_clients} clients x {n_slots} slots in {:.2}s: {wins} booked, {conflicts} conflicts",
        elapsed.as_secs_f64()
    );
    if wins != n_slots as usize {
        println!("  !! expected exactly {n_slots} winners, got {wins}");
    }
}

async fn phase3_read_under_load(host: &str, port: u16, pw: &str, courts: &[i64], epoch: NaiveDate) {
    let read_court = courts[0];
    let stop = Arc::new(AtomicBool::new(false));

    let mut writer_handles = Vec::new();
    for (w, &court) in courts[1..].iter().enumerate().take(5) {
        let host = host.to_string();
        let pw = pw.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &pw).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let (day, hour) = slot(epoch, i);
                let _ = client
                    .batch_execute(&booking_sql(court, day, hour, w as i64))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let pw = pw.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &pw).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let (day, _) = slot(epoch, (r * reads_per_reader + i) as u64 % 200);
                let t = Instant::now();
                let rows = client
                    .simple_query(&format!(
                        r#"SELECT * FROM availability WHERE resource_id = {read_court} AND day = '{day}' AND start >= '08:00' AND "end" <= '22:00'"#
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
                debug_assert!(rows.iter().any(|m| matches!(m, SimpleQueryMessage::Row(_))));
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_hold_churn(host: &str, port: u16, pw: &str, court: i64, epoch: NaiveDate) {
    let client = connect(host, port, pw).await;
    let n = 1000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let (day, hour) = slot(epoch, i % HOURS_PER_DAY);
        let t = Instant::now();
        let rows = client
            .simple_query(&format!(
                r#"INSERT INTO holds (resource_id, day, start, "end", owner, ttl_seconds) VALUES ({court}, '{day}', '{hour:02}:00', '{:02}:00', 'bench', 60)"#,
                hour + 1
            ))
            .await
            .unwrap();
        let token = rows.iter().find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("token").map(str::to_string),
            _ => None,
        });
        if let Some(token) = token {
            client
                .batch_execute(&format!("DELETE FROM holds WHERE token = '{token}'"))
                .await
                .unwrap();
        }
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    println!(
        "  {n} acquire+release pairs in {:.2}s = {:.0} pairs/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("hold round trip", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTGUARD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTGUARD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SLOTGUARD_PORT");
    let pw = std::env::var("SLOTGUARD_PASSWORD").unwrap_or_else(|_| "slotguard".into());

    println!("=== slotguard stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Fresh ids per run so a long-lived server can be benchmarked repeatedly.
    let base = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        % 1_000_000) as i64
        * 100;
    let epoch = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();

    println!("[setup]");
    let setup_client = connect(&host, port, &pw).await;
    let courts = setup(&setup_client, base, 10).await;
    drop(setup_client);

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&host, port, &pw, courts[9], epoch).await;

    println!("\n[phase 2] contended slots");
    phase2_contention(&host, port, &pw, courts[8], epoch).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port, &pw, &courts, epoch).await;

    println!("\n[phase 4] hold churn");
    phase4_hold_churn(&host, port, &pw, courts[7], epoch).await;

    println!("\n=== benchmark complete ===");
}
