use ox_forms::api::MockApiClient;
use ox_forms::config::load_form_config;
use ox_forms::render::FormEngine;
use ox_forms::registry::WidgetRegistry;
use ox_forms::session::{FormSession, SubmitOutcome};
use ox_forms::wizard::Transition;
use serde_json::json;
use std::path::PathBuf;

fn print_step(session: &FormSession, engine: &FormEngine) {
    let Some(step) = session.current() else {
        return;
    };
    println!("== Step {} ({}) {:?}", session.current_step() + 1, step.id, session.step_statuses());
    for resolved in engine.resolve_step(step, session.values(), session.role()) {
        let state = resolved.state;
        println!(
            "   {:<16} visible={:<5} enabled={:<5} required={:<5} value={}",
            resolved.field.name,
            state.visible,
            state.enabled,
            state.required,
            session.value(&resolved.field.name).cloned().unwrap_or_default()
        );
    }
    let actions: Vec<&str> = session.actions().iter().map(|a| a.action_type.as_str()).collect();
    println!("   actions: {:?}", actions);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/registration.yaml")));
    let role = std::env::args().nth(2);

    let config = load_form_config(&path)?;
    let mut session = FormSession::new(&config, role.as_deref())?;
    let client = MockApiClient::with_sample_data();
    let registry = WidgetRegistry::new();
    let engine = FormEngine::new(&registry);

    print_step(&session, &engine);
    if let Transition::Rejected { errors, .. } = session.next()? {
        for error in &errors.errors {
            println!("   ! {}", error);
        }
    }

    session.set_value("name", json!("Ada Lovelace"))?;
    session.next()?;
    let countries = session.load_options("country", &client).await?;
    println!("   loaded {} countries", countries.len());
    print_step(&session, &engine);

    session.next()?;
    session.set_value("order.qty", json!(3))?;
    print_step(&session, &engine);

    match session.submit(&client).await? {
        SubmitOutcome::Submitted { response, .. } => println!("submitted: {}", response.unwrap_or_default()),
        other => println!("not submitted: {:?}", other),
    }
    for note in session.take_notifications() {
        println!("[{:?}] {}: {}", note.kind, note.message, note.description);
    }
    Ok(())
}
