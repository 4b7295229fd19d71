//! Integration tests for checkpoint storage: round trips, integrity
//! failures and archive export/import between storage roots.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::fs::{self, File};
use std::io::{Read, Write};
use surveyor_core::checkpoint::{CheckpointManager, CheckpointMetadata, CheckpointStage};
use surveyor_core::error::CheckpointError;
use surveyor_core::research::{ProblemDefinition, ResearchPhase, ResearchState};
use surveyor_core::surveyor_stats::{MonteCarloConfig, MonteCarloResult, ProjectionEngine, ProjectionInput};
use tempfile::TempDir;

fn sample_state() -> ResearchState {
    let mut state = ResearchState::new("Mayoral race");
    state.problem_definition = Some(ProblemDefinition {
        title: "Vote intention".into(),
        objectives: vec!["Estimate shares".into()],
        candidates: vec!["Ana".into(), "Bruno".into()],
        key_variables: vec!["region".into(), "age_group".into()],
        ..Default::default()
    });
    state.transition(ResearchPhase::Methodology).unwrap();
    state
}

#[test]
fn test_roundtrip_is_byte_identical() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = CheckpointManager::new(dir.path());
    let state = sample_state();
    let id = state.research_id();

    store.save(&id, "problem-definition", &state, CheckpointMetadata::completed())?;
    let loaded: ResearchState = store.load_data(&id, Some("problem-definition"))?;

    assert_eq!(serde_json::to_vec(&loaded)?, serde_json::to_vec(&state)?);
    assert_eq!(loaded, state);
    Ok(())
}

#[test]
fn test_nested_maps_survive_key_reordering() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = CheckpointManager::new(dir.path());
    let data = json!({"z": {"b": [1, 2, {"y": 1, "x": 2}], "a": null}, "m": "text"});
    let record = store.save("r1", "analysis", &data, CheckpointMetadata::started())?;

    // Rewrite the record with keys in a different order; the hash must still hold.
    let path = dir.path().join("r1").join("analysis.json");
    let mut raw: Value = serde_json::from_slice(&fs::read(&path)?)?;
    raw["data"] = serde_json::from_str(
        r#"{"m": "text", "z": {"a": null, "b": [1, 2, {"x": 2, "y": 1}]}}"#,
    )?;
    fs::write(&path, serde_json::to_vec(&raw)?)?;

    let reloaded = store.load("r1", Some("analysis"))?;
    assert_eq!(reloaded.hash, record.hash);
    assert_eq!(reloaded.data, data);
    Ok(())
}

#[test]
fn test_simulation_output_survives_reload() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = CheckpointManager::new(dir.path());
    let engine = ProjectionEngine::new(MonteCarloConfig {
        trials: 2_000,
        seed: Some(99),
    });
    let input = ProjectionInput::new([("Ana", 41.3), ("Bruno", 33.7), ("Carla", 11.9)], 0.031, 13.1);
    let simulation = engine.simulate(&input)?;
    let scenarios = engine.scenarios(&input)?;

    for i in 0..20 {
        let phase = format!("projections-{i}");
        let saved = store.save("r1", &phase, &simulation, CheckpointMetadata::completed())?;
        let loaded = store.load("r1", Some(phase.as_str()))?;
        assert_eq!(loaded.hash, saved.hash);
        let back: MonteCarloResult = loaded.data_as()?;
        assert_eq!(back, simulation);
    }

    store.save("r1", "scenarios", &scenarios, CheckpointMetadata::completed())?;
    let reloaded: Vec<surveyor_core::surveyor_stats::ProjectionScenario> =
        store.load_data("r1", None)?;
    assert_eq!(reloaded, scenarios);
    Ok(())
}

#[test]
fn test_mutated_hash_fails_with_integrity_error() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointManager::new(dir.path());
    let state = sample_state();
    let id = state.research_id();
    store
        .save(&id, "methodology", &state, CheckpointMetadata::started())
        .unwrap();

    let path = dir.path().join(&id).join("methodology.json");
    let mut raw: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    raw["hash"] = json!("0".repeat(64));
    fs::write(&path, serde_json::to_vec_pretty(&raw).unwrap()).unwrap();

    for phase in [Some("methodology"), None] {
        match store.load(&id, phase) {
            Err(CheckpointError::Integrity { expected, actual, .. }) => {
                assert_eq!(expected, "0".repeat(64));
                assert_ne!(actual, expected);
            }
            other => panic!("expected integrity failure, got {other:?}"),
        }
    }
}

#[test]
fn test_latest_follows_most_recent_save() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointManager::new(dir.path());
    store
        .save("r1", "sampling", &json!({"n": 1}), CheckpointMetadata::started())
        .unwrap();
    store
        .save("r1", "sampling", &json!({"n": 2}), CheckpointMetadata::completed())
        .unwrap();
    store
        .save("r1", "questionnaire", &json!({"n": 3}), CheckpointMetadata::started())
        .unwrap();

    let latest = store.load("r1", None).unwrap();
    assert_eq!(latest.phase, "questionnaire");
    let sampling = store.load("r1", Some("sampling")).unwrap();
    assert_eq!(sampling.data, json!({"n": 2}));
    assert_eq!(sampling.metadata.stage, CheckpointStage::Completed);

    let phases: Vec<String> = store
        .list(Some("r1"))
        .unwrap()
        .into_iter()
        .map(|c| c.phase)
        .collect();
    assert_eq!(phases, vec!["questionnaire".to_string(), "sampling".to_string()]);
}

#[test]
fn test_export_import_into_another_root() -> anyhow::Result<()> {
    let source_dir = TempDir::new()?;
    let target_dir = TempDir::new()?;
    let source = CheckpointManager::new(source_dir.path().join("store"));
    let target = CheckpointManager::new(target_dir.path().join("store"));

    let mut state = sample_state();
    let id = state.research_id();
    source.save(&id, "problem-definition", &state, CheckpointMetadata::completed())?;
    state.transition(ResearchPhase::Sampling)?;
    source.save(&id, "methodology", &state, CheckpointMetadata::completed())?;

    let archive = source_dir.path().join("exports").join("research.zip");
    assert_eq!(source.export(&id, &archive)?, 2);

    let imported = target.import(&archive)?;
    assert_eq!(imported, id);
    assert_eq!(target.list(Some(id.as_str()))?.len(), 2);

    let latest: ResearchState = target.load_data(&id, None)?;
    assert_eq!(latest, state);
    assert_eq!(latest.phase, ResearchPhase::Sampling);
    for phase in ["problem-definition", "methodology"] {
        assert_eq!(
            target.load(&id, Some(phase))?.hash,
            source.load(&id, Some(phase))?.hash
        );
    }
    Ok(())
}

#[test]
fn test_import_rejects_tampered_archive() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let source = CheckpointManager::new(dir.path().join("source"));
    source.save("r1", "analysis", &json!({"leader": "Ana"}), CheckpointMetadata::completed())?;
    let archive = dir.path().join("good.zip");
    source.export("r1", &archive)?;

    // Copy the archive, changing the record's data but keeping its hash.
    let tampered = dir.path().join("tampered.zip");
    let mut reader = zip::ZipArchive::new(File::open(&archive)?)?;
    let mut writer = zip::ZipWriter::new(File::create(&tampered)?);
    let options = zip::write::SimpleFileOptions::default();
    for i in 0..reader.len() {
        let mut entry = reader.by_index(i)?;
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        if name == "analysis.json" {
            let mut record: Value = serde_json::from_slice(&bytes)?;
            record["data"]["leader"] = json!("Bruno");
            bytes = serde_json::to_vec(&record)?;
        }
        writer.start_file(name.as_str(), options)?;
        writer.write_all(&bytes)?;
    }
    writer.finish()?;

    let target = CheckpointManager::new(dir.path().join("target"));
    let err = target.import(&tampered).unwrap_err();
    assert!(matches!(err, CheckpointError::Integrity { .. }), "got {err:?}");
    assert!(target.list(None)?.is_empty());
    Ok(())
}

#[test]
fn test_export_unknown_research_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointManager::new(dir.path());
    let err = store
        .export("missing", &dir.path().join("out.zip"))
        .unwrap_err();
    assert!(matches!(err, CheckpointError::NotFound { .. }));
}
