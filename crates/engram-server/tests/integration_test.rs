use engram_core::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn chat_event(session: &str, turn: u32, text: &str) -> InteractionEvent {
    InteractionEvent {
        session_id: session.to_string(),
        turn,
        channel: "chat".to_string(),
        text: text.to_string(),
        entities_hint: vec![],
        client_timestamp: None,
        stt_confidence: None,
        tz_offset_minutes: 0,
    }
}

struct Harness {
    service: Arc<Engram>,
    small: Arc<ScriptedLlm>,
    large: Arc<ScriptedLlm>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let small = Arc::new(ScriptedLlm::new("llm_small"));
    let large = Arc::new(ScriptedLlm::new("llm_large"));
    let service = Engram::open(
        dir.path().join("engram.redb"),
        EngramConfig::default(),
        small.clone(),
        large.clone(),
        None,
    )
    .unwrap();
    service.start();
    Harness {
        service,
        small,
        large,
        _dir: dir,
    }
}

/// Poll until the condition holds or the deadline passes.
async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn script_wife_interaction(h: &Harness) {
    h.small.push_response(
        r#"[{"name": "Lena", "kind": "person", "explicit": true, "new": true},
            {"name": "Malbec", "kind": "concept", "explicit": true, "new": true}]"#,
    );
    h.small.push_response(
        r#"[{"subject": "User", "subject_kind": "person", "relation": "married_to",
             "object": "Lena", "object_kind": "person", "tags": ["family"]},
            {"subject": "Lena", "subject_kind": "person", "relation": "loves",
             "object": "Malbec", "object_kind": "concept", "tags": ["wine"]}]"#,
    );
    // Probe synthesis for the wine gap opened by the tagged edge.
    h.large
        .push_response(r#"{"question": "Does Lena prefer any particular Malbec?", "tags": ["wine"]}"#);
}

// ── Scenario 1: explicit preference ─────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn explicit_preference_builds_expected_graph() {
    let h = harness();
    script_wife_interaction(&h);

    let ack = h
        .service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();
    assert!(ack.accepted);

    let service = h.service.clone();
    wait_until(
        move || {
            service
                .query(&QuerySpec {
                    entities: vec!["Lena".to_string()],
                    max_hops: 1,
                    ..Default::default()
                })
                .edge_count()
                == 2
        },
        "graph to contain both edges",
    )
    .await;

    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["User".to_string()],
        max_hops: 2,
        ..Default::default()
    });
    assert_eq!(subgraph.node_count(), 3);

    let loves = subgraph
        .edges
        .iter()
        .find(|e| e.relation.as_str() == "loves")
        .unwrap();
    assert!((loves.confidence - 0.90).abs() < 0.05);
    assert_eq!(loves.temporal, TemporalType::Trait);
    assert_eq!(loves.provenance, Provenance::Explicit);
    assert_eq!(loves.source_episodes.len(), 1);

    // One episode, and the audit trail carries the inserts.
    let stats = h.service.stats().unwrap();
    assert_eq!(stats.episode_count, 1);
    let inserts = h
        .service
        .audit_query(AuditFilter {
            kind: Some(AuditKind::EdgeInserted),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(inserts.len(), 2);
}

// ── Scenario 2: reinforcement and merge ─────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn repeated_statement_reinforces_and_refinement_merges() {
    let h = harness();
    script_wife_interaction(&h);
    h.service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 2,
        "first interaction to apply",
    )
    .await;

    h.small.push_response(
        r#"[{"name": "Lena", "kind": "person", "explicit": true},
            {"name": "Malbec 2018", "kind": "concept", "explicit": false, "new": true}]"#,
    );
    h.small.push_response(
        r#"[{"subject": "Lena", "relation": "loves", "object": "Malbec",
             "object_kind": "concept", "tags": ["wine"]},
            {"subject": "Lena", "relation": "prefers", "object": "Malbec 2018",
             "object_kind": "concept", "tags": ["wine"],
             "refines": {"subject": "Lena", "relation": "loves", "object": "Malbec"}}]"#,
    );
    h.service
        .report_interaction(chat_event(
            "s1",
            2,
            "She really loves Malbec, especially the 2018",
        ))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 3,
        "second interaction to apply",
    )
    .await;

    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["Lena".to_string()],
        max_hops: 1,
        ..Default::default()
    });
    let loves = subgraph
        .edges
        .iter()
        .find(|e| e.relation.as_str() == "loves")
        .unwrap();
    // 0.90 + 0.08 × (1 − 0.90)
    assert!((loves.confidence - 0.908).abs() < 1e-3);
    assert_eq!(loves.source_episodes.len(), 2);

    let prefers = subgraph
        .edges
        .iter()
        .find(|e| e.relation.as_str() == "prefers")
        .unwrap();
    assert_eq!(prefers.refines, Some(loves.id));

    let reinforces = h
        .service
        .audit_query(AuditFilter {
            kind: Some(AuditKind::EdgeReinforced),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(reinforces.len(), 1);
}

// ── Scenario 3: contradiction and revise ────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn confident_contradiction_supersedes() {
    let h = harness();

    // Seed Lena's age from a hedged statement; moderate hedge lands it
    // well below the later explicit correction.
    h.small
        .push_response(r#"[{"name": "Lena", "kind": "person", "explicit": true}]"#);
    h.small.push_response(
        r#"[{"subject": "Lena", "relation": "age", "object": "47", "object_kind": "concept"}]"#,
    );
    h.service
        .report_interaction(chat_event("s1", 1, "I think Lena is 47"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 1,
        "seed fact to apply",
    )
    .await;

    // Unhedged correction at explicit confidence.
    h.small
        .push_response(r#"[{"name": "Lena", "kind": "person", "explicit": true}]"#);
    h.small.push_response(
        r#"[{"subject": "Lena", "relation": "age", "object": "46", "object_kind": "concept"}]"#,
    );
    h.service
        .report_interaction(chat_event("s1", 2, "Actually Lena is 46"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || {
            service
                .stats()
                .map(|s| s.retracted_edge_count == 1)
                .unwrap_or(false)
        },
        "revision to apply",
    )
    .await;

    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["Lena".to_string()],
        max_hops: 1,
        ..Default::default()
    });
    assert_eq!(subgraph.edge_count(), 1);
    let age = &subgraph.edges[0];
    let target = &subgraph.nodes[&age.target];
    assert_eq!(target.name, "46");
    assert!((age.confidence - 0.90).abs() < 0.05);

    // The superseded edge survives for audit only.
    let retractions = h
        .service
        .audit_query(AuditFilter {
            kind: Some(AuditKind::EdgeRetracted),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(retractions.len(), 1);
    assert_eq!(retractions[0].reasoning.as_deref(), Some("superseded"));
}

// ── Scenario 4: hallucination rejection ─────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn hallucinated_entity_causes_no_mutation() {
    let h = harness();
    h.small.push_response(
        r#"[{"name": "Boris", "kind": "person", "explicit": true, "new": true}]"#,
    );
    h.small.push_response(r#"[]"#);

    h.service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || {
            !service
                .audit_query(AuditFilter {
                    kind: Some(AuditKind::InteractionSkipped),
                    ..Default::default()
                })
                .unwrap_or_default()
                .is_empty()
        },
        "interaction to be skipped",
    )
    .await;

    let stats = h.service.stats().unwrap();
    assert_eq!(stats.node_count, 0);
    assert_eq!(stats.edge_count, 0);

    let hallucinations = h
        .service
        .audit_query(AuditFilter {
            kind: Some(AuditKind::HallucinationDetected),
            ..Default::default()
        })
        .unwrap();
    assert!(!hallucinations.is_empty());
}

// ── Scenario 5: probe generation and gated delivery ─────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn knowledge_gap_probe_is_delivered_once() {
    let h = harness();
    script_wife_interaction(&h);
    h.service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();

    // The wine-tagged family edge has no preference coverage for User,
    // so the proactive engine queues a probe.
    let service = h.service.clone();
    wait_until(
        move || service.health().outbound_queued > 0,
        "probe to be queued",
    )
    .await;

    let delivered = h
        .service
        .get_probes(&ProbeRequest {
            active_topics: vec!["wine".to_string()],
            entities_in_scope: vec!["Lena".to_string(), "User".to_string()],
            channel: "chat".to_string(),
            session_id: "s1".to_string(),
            turn: 4,
            now: chrono::Utc::now(),
        })
        .unwrap();
    let delivered = delivered.expect("probe should be delivered");
    assert!(delivered.context_fit > 0.3);

    // Max one per conversation: the immediate second call is empty.
    let again = h
        .service
        .get_probes(&ProbeRequest {
            active_topics: vec!["wine".to_string()],
            entities_in_scope: vec!["Lena".to_string()],
            channel: "chat".to_string(),
            session_id: "s1".to_string(),
            turn: 5,
            now: chrono::Utc::now(),
        })
        .unwrap();
    assert!(again.is_none());
}

// ── Scenario 6: decay and archive ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn stale_edge_decays_out_of_query_results() {
    let h = harness();
    let store = h.service.store();
    let correlation = uuid::Uuid::now_v7();

    let user = store
        .upsert_node(correlation, NodeKind::Person, "User", &[], &[], PrivacyLevel::L3Private)
        .unwrap();
    let topic = store
        .upsert_node(correlation, NodeKind::Concept, "pottery", &[], &[], PrivacyLevel::L0Public)
        .unwrap();
    let episode = Episode::new("s1", 1, "chat");
    store.record_episode(correlation, &episode).unwrap();
    let edge = store
        .create_edge(
            correlation,
            NewEdge {
                source: user,
                target: topic,
                relation: Relation::new("interested_in").unwrap(),
                temporal: TemporalType::Wish,
                confidence: 0.30,
                provenance: Provenance::Observational,
                context_tags: vec![],
                episode: Some(episode.id),
                expiry: None,
                refines: None,
            },
        )
        .unwrap();

    // Six silent months at 0.08/month.
    let mut stale = edge.clone();
    stale.last_reinforced = chrono::Utc::now() - chrono::Duration::days(30 * 6);
    stale.decay_rate = 0.08;
    store.storage().put_edge(&stale).unwrap();

    let report = h.service.decay_worker().run_once(chrono::Utc::now()).unwrap();
    assert_eq!(report.archived, 1);

    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["User".to_string()],
        max_hops: 1,
        ..Default::default()
    });
    assert_eq!(subgraph.edge_count(), 0);

    let archived = h
        .service
        .audit_query(AuditFilter {
            kind: Some(AuditKind::EdgeArchived),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(archived.len(), 1);
}

// ── Boundary behaviors ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn empty_utterance_writes_only_a_skip_record() {
    let h = harness();
    h.service
        .report_interaction(chat_event("s1", 1, "?!..."))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || {
            !service
                .audit_query(AuditFilter {
                    kind: Some(AuditKind::InteractionSkipped),
                    ..Default::default()
                })
                .unwrap_or_default()
                .is_empty()
        },
        "skip record",
    )
    .await;

    let stats = h.service.stats().unwrap();
    assert_eq!(stats.node_count, 0);
    assert_eq!(stats.edge_count, 0);
    assert_eq!(h.small.remaining(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_idempotency_key_processes_once() {
    let h = harness();
    script_wife_interaction(&h);

    let first = h
        .service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();
    let second = h
        .service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();
    assert!(first.accepted);
    assert!(second.duplicate);

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 2,
        "single application",
    )
    .await;

    // Settled: still exactly one episode.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.service.stats().unwrap().episode_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_probe_queue_returns_none() {
    let h = harness();
    let delivered = h
        .service
        .get_probes(&ProbeRequest {
            active_topics: vec!["wine".to_string()],
            entities_in_scope: vec![],
            channel: "chat".to_string(),
            session_id: "s1".to_string(),
            turn: 10,
            now: chrono::Utc::now(),
        })
        .unwrap();
    assert!(delivered.is_none());
}

// ── Query surface and corrections ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn degraded_query_on_cold_graph_is_empty_not_error() {
    let h = harness();
    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["Anyone".to_string()],
        ..Default::default()
    });
    assert!(subgraph.is_empty());
    assert!(!subgraph.soft_error);
}

#[tokio::test(flavor = "multi_thread")]
async fn user_correction_revises_without_gating() {
    let h = harness();
    script_wife_interaction(&h);
    h.service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 2,
        "interaction to apply",
    )
    .await;

    h.service
        .user_correction(&UserCorrection {
            kind: CorrectionKind::Retract,
            entity: "Lena".to_string(),
            relation: Some("loves".to_string()),
            old_value: None,
            new_value: None,
        })
        .unwrap();

    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["Lena".to_string()],
        max_hops: 1,
        ..Default::default()
    });
    assert!(subgraph
        .edges
        .iter()
        .all(|e| e.relation.as_str() != "loves"));
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_roundtrip_preserves_active_graph() {
    let h = harness();
    script_wife_interaction(&h);
    h.service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 2,
        "interaction to apply",
    )
    .await;

    let export = h.service.graph_snapshot(SnapshotFormat::Full).unwrap();
    let SnapshotExport::Full(snapshot) = export else {
        panic!("expected full snapshot");
    };

    // Re-ingest into an empty service; equivalence classes and active
    // edges survive.
    let dir = tempdir().unwrap();
    let storage = Arc::new(RedbStorage::open(dir.path().join("copy.redb")).unwrap());
    let bus = EventBus::new(BusConfig::default());
    let audit = Arc::new(AuditLog::new(storage.database()));
    let copy = GraphStore::new(
        storage,
        bus,
        audit,
        ConfidenceConfig::default(),
        DecayRates::default(),
    );
    for episode in &snapshot.episodes {
        copy.record_episode(uuid::Uuid::now_v7(), episode).unwrap();
    }
    for node in &snapshot.nodes {
        copy.storage().put_node(node).unwrap();
    }
    for edge in &snapshot.edges {
        copy.storage().put_edge(edge).unwrap();
    }

    assert_eq!(copy.snapshot().unwrap().edges.len(), snapshot.edges.len());
    assert!(copy.resolve_alias("lena").unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn provenance_chain_links_edge_to_episode() {
    let h = harness();
    script_wife_interaction(&h);
    h.service
        .report_interaction(chat_event("s1", 1, "My wife Lena loves Malbec"))
        .unwrap();

    let service = h.service.clone();
    wait_until(
        move || service.stats().map(|s| s.active_edge_count).unwrap_or(0) == 2,
        "interaction to apply",
    )
    .await;

    let subgraph = h.service.query(&QuerySpec {
        entities: vec!["Lena".to_string()],
        max_hops: 1,
        ..Default::default()
    });
    let chain = h.service.get_provenance(subgraph.edges[0].id).unwrap();
    assert_eq!(chain.episodes.len(), 1);
    assert_eq!(chain.episodes[0].session_id, "s1");
}
