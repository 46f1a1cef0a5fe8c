use chrono::{Duration, TimeZone, Utc};
use cim_tenancy::domain::{self, organization, user};
use cim_tenancy::materialize::fold;
use cim_tenancy::{CommandPayload, Event, EventInput, Repos, Verb};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

fn setup_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn history(len: usize) -> Vec<Event> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..len)
        .map(|i| {
            let (command, values) = if i == 0 {
                (Verb::Create, json!({ "name": "org-0" }))
            } else {
                (Verb::Update, json!({ "name": format!("org-{i}") }))
            };
            Event::from_input(
                EventInput {
                    entity_type: "organization".into(),
                    entity_id: "o1".into(),
                    command,
                    date: base + Duration::seconds(i as i64),
                    values: values.as_object().cloned().unwrap(),
                    user_id: None,
                },
                i as u64,
            )
        })
        .collect()
}

fn benchmark_fold(c: &mut Criterion) {
    let def = organization::definition().unwrap();
    let mut group = c.benchmark_group("fold");

    for len in [10, 100, 1_000, 10_000].iter() {
        let events = history(*len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &events, |b, events| {
            b.iter(|| black_box(fold(&def, events, false)));
        });
    }
    group.finish();
}

fn benchmark_rename_cascade(c: &mut Criterion) {
    let rt = setup_runtime();
    let mut group = c.benchmark_group("rename_cascade");

    for users in [10, 100, 1_000].iter() {
        let repos = rt.block_on(async {
            let repos = Repos::builder(domain::tenancy_registry().unwrap()).build().unwrap();
            repos
                .repo("organization")
                .unwrap()
                .create(CommandPayload::new("o1").value("name", "Acme"), None)
                .await
                .unwrap();
            let user_repo = repos.repo("user").unwrap();
            for i in 0..*users {
                let id = format!("u{i}");
                user_repo
                    .create(
                        CommandPayload::new(&id)
                            .value("email", format!("user{i}@acme.io"))
                            .value("givenName", "Bench")
                            .value("familyName", "User"),
                        None,
                    )
                    .await
                    .unwrap();
                user::manage_org(&user_repo, &id, "o1", "Member", None).await.unwrap();
            }
            repos
        });

        let mut round = 0usize;
        group.bench_with_input(BenchmarkId::from_parameter(users), &repos, |b, repos| {
            b.iter(|| {
                round += 1;
                rt.block_on(async {
                    let orgs = repos.repo("organization").unwrap();
                    domain::update_name(&orgs, "o1", &format!("Acme {round}"), None)
                        .await
                        .unwrap()
                })
            });
        });
    }
    group.finish();
}

fn benchmark_materialize_all(c: &mut Criterion) {
    let rt = setup_runtime();
    let repos = rt.block_on(async {
        let repos = Repos::builder(domain::tenancy_registry().unwrap()).build().unwrap();
        let orgs = repos.repo("organization").unwrap();
        for i in 0..500 {
            orgs.create(CommandPayload::new(format!("o{i}")).value("name", format!("Org {i}")), None)
                .await
                .unwrap();
        }
        repos
    });

    c.bench_function("materialize_all_unchanged", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(repos.materialize_all("organization", None).await.unwrap()) })
        });
    });
}

criterion_group!(benches, benchmark_fold, benchmark_rename_cascade, benchmark_materialize_all);
criterion_main!(benches);
