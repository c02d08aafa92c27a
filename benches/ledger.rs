//! Ledger throughput under duplicate-heavy delivery
//!
//! Run with: cargo bench --bench ledger

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use match_authority::authority::AuthorityManager;
use match_authority::game::dedup::VictimHandle;
use match_authority::game::ledger::PlayerStatsLedger;
use match_authority::game::state::{AgentId, PlayerId};

const DEDUP_CAPACITY: usize = 1024;

fn authority() -> AuthorityManager {
    let mut manager = AuthorityManager::new(PlayerId::from("host"));
    manager.on_elected();
    manager.complete_recovery();
    manager
}

/// Kill reports where every report arrives `copies` times
fn kill_reports(players: usize, kills: usize, copies: usize) -> Vec<(PlayerId, VictimHandle)> {
    let mut reports = Vec::with_capacity(kills * copies);
    for i in 0..kills {
        let actor = PlayerId::new(format!("Player{}", i % players));
        let victim = VictimHandle::FillAgent(AgentId(i as u64));
        for _ in 0..copies {
            reports.push((actor.clone(), victim.clone()));
        }
    }
    reports
}

fn bench_apply_kill(c: &mut Criterion) {
    let manager = authority();
    let Ok(cap) = manager.capability() else {
        return;
    };

    let mut group = c.benchmark_group("apply_kill");
    for copies in [1usize, 2, 4] {
        let reports = kill_reports(6, 1000, copies);
        group.throughput(Throughput::Elements(reports.len() as u64));
        group.bench_with_input(BenchmarkId::new("copies", copies), &reports, |b, reports| {
            b.iter(|| {
                let mut ledger = PlayerStatsLedger::new(100, DEDUP_CAPACITY);
                for (actor, victim) in reports {
                    let _ = black_box(ledger.apply_kill(cap, actor, victim));
                }
                ledger
            });
        });
    }
    group.finish();
}

fn bench_score_delta(c: &mut Criterion) {
    let manager = authority();
    let Ok(cap) = manager.capability() else {
        return;
    };
    let actor = PlayerId::from("Player0");
    let ids: Vec<_> = (0..1000).map(|_| uuid::Uuid::new_v4()).collect();

    c.bench_function("apply_score_delta/1000", |b| {
        b.iter(|| {
            let mut ledger = PlayerStatsLedger::new(100, DEDUP_CAPACITY);
            for id in &ids {
                let _ = black_box(ledger.apply_score_delta(cap, &actor, 10, Some(*id)));
            }
            ledger
        });
    });
}

criterion_group!(benches, bench_apply_kill, bench_score_delta);
criterion_main!(benches);
