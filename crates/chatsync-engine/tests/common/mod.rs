use chatsync_engine::{EventStream, ReplaySession, SelectionEffect};
use chatsync_proto::config::{MemorySettingsProvider, ReplaySettings};
use chatsync_proto::protocol::{
    AutoSelectConfig, CandidateMetadata, MatchConfig, SelectionMode, TimestampedEvent,
};
use std::time::Instant;

pub fn session(mode: SelectionMode, auto_select: AutoSelectConfig) -> ReplaySession {
    let provider = MemorySettingsProvider::new(ReplaySettings {
        mode,
        auto_select,
        delay_secs: 0.0,
    });
    ReplaySession::new(Box::new(provider), MatchConfig::default(), Instant::now())
}

pub fn candidate(id: &str, title: &str, duration_secs: f64) -> CandidateMetadata {
    CandidateMetadata {
        id: id.into(),
        title: title.into(),
        duration_secs,
        created_at: None,
    }
}

/// One message per second starting at 0.
pub fn chat(n: usize) -> EventStream {
    EventStream::new(
        (0..n)
            .map(|i| TimestampedEvent {
                id: format!("msg-{}", i),
                offset_secs: i as f64,
                payload: serde_json::json!({ "author": "viewer", "text": format!("hello {}", i) }),
            })
            .collect(),
    )
    .expect("sorted fixture")
}

pub fn selections(effects: &[SelectionEffect]) -> Vec<(String, u64, bool)> {
    effects
        .iter()
        .filter_map(|e| match e {
            SelectionEffect::Select {
                candidate,
                generation,
                automatic,
            } => Some((candidate.id.clone(), *generation, *automatic)),
            _ => None,
        })
        .collect()
}

pub fn notify_ticket(effects: &[SelectionEffect]) -> Option<u64> {
    effects.iter().find_map(|e| match e {
        SelectionEffect::ArmNotifyTimer { ticket, .. } => Some(*ticket),
        _ => None,
    })
}
