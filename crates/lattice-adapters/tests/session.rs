//! Full sessions through the provider adapter with mock providers.

use lattice_adapters::ProviderAdapter;
use lattice_core::{Kernel, LatticeConfig, RolesConfig, SessionRequest, TurnMediator};
use lattice_proto::Role;
use serde_json::json;

fn kernel() -> Kernel {
    Kernel::from_value(json!({
        "brand_identity_kernel": {
            "modal_domains": {
                "visual": { "outputs": { "amplify_brand_colours": 7 } }
            },
            "resonance_map": { "S1-visual": [7] }
        }
    }))
    .unwrap()
}

fn mock_roles() -> RolesConfig {
    RolesConfig {
        role_a: "mock".to_string(),
        role_b: "dummy".to_string(),
    }
}

#[tokio::test]
async fn test_mock_session_runs_full_budget() {
    let adapter = ProviderAdapter::from_config(&LatticeConfig::default());
    let mediator = TurnMediator::new(adapter, kernel(), mock_roles());

    let request = SessionRequest::new("Launch the spring palette")
        .turns(4)
        .strain_threshold(0.9);
    let session = mediator.run_session(&request).await;

    assert_eq!(session.len(), 4);
    assert!(!session.stopped_on_strain);
    assert!(session.messages[0].text.starts_with("[MOCK/MOCK] S1: Propose"));
    assert!(session.messages[1].text.starts_with("[MOCK/DUMMY] Critique"));
    assert_eq!(session.messages[2].speaker, Role::A);
    // Prime signal, one role marker: 0.30 - 0.06.
    assert!((session.messages[0].strain - 0.24).abs() < 1e-9);
}

#[tokio::test]
async fn test_mock_session_stops_on_first_turn() {
    let adapter = ProviderAdapter::from_config(&LatticeConfig::default());
    let mediator = TurnMediator::new(adapter, kernel(), mock_roles());

    let request = SessionRequest::new("Launch").turns(6).strain_threshold(0.2);
    let session = mediator.run_session(&request).await;

    assert_eq!(session.len(), 1);
    assert!(session.stopped_on_strain);

    let json = serde_json::to_string(&session).unwrap();
    let back: lattice_proto::Session = serde_json::from_str(&json).unwrap();
    assert_eq!(back, session);
}

#[tokio::test]
async fn test_unknown_provider_text_becomes_turn_text() {
    let adapter = ProviderAdapter::from_config(&LatticeConfig::default());
    let roles = RolesConfig {
        role_a: "claude".to_string(),
        role_b: "mock".to_string(),
    };
    let mediator = TurnMediator::new(adapter, kernel(), roles);

    let session = mediator
        .run_session(&SessionRequest::new("x").turns(2).strain_threshold(0.9))
        .await;

    assert_eq!(session.messages[0].text, "[LLM_ERROR] Unknown provider 'claude'.");
    assert!(session.messages[1].text.contains("LAST MESSAGE (S1): [LLM_ERROR]"));
}
