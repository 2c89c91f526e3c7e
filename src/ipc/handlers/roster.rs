use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::{members_from_json, RosterMember, RosterSnapshot};
use serde_json::{json, Value};
use tracing::{info, warn};

fn read_members(params: &Value) -> Result<Vec<RosterMember>, HandlerErr> {
    if let Some(members) = params.get("members") {
        return members_from_json(members)
            .ok_or_else(|| HandlerErr::new("bad_params", "members must be an array"));
    }
    let in_path = get_required_str(params, "inPath")
        .map_err(|_| HandlerErr::new("bad_params", "missing members or inPath"))?;
    let text = std::fs::read_to_string(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    let v: Value = serde_json::from_str(&text).map_err(|e| {
        HandlerErr::new("parse_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    members_from_json(&v).ok_or_else(|| {
        HandlerErr::new("parse_failed", "roster file must hold an array of members")
            .with_details(json!({ "path": in_path }))
    })
}

fn handle_roster_load(state: &mut AppState, req: &Request) -> Value {
    let members = match read_members(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let snapshot = RosterSnapshot::new(members);
    if snapshot.index().is_empty() {
        warn!("roster loaded without any usable members; every row will be unmapped");
    }
    let result = json!({
        "members": snapshot.members().len(),
        "aliases": snapshot.index().len(),
        "collisions": snapshot.index().collisions()
    });
    info!(
        members = snapshot.members().len(),
        aliases = snapshot.index().len(),
        "roster loaded"
    );
    state.session.roster = Some(snapshot);
    ok(&req.id, result)
}

fn handle_roster_lookup(state: &mut AppState, req: &Request) -> Value {
    let Some(roster) = state.session.roster.as_ref() else {
        return HandlerErr::new("no_roster", "load a roster first").response(&req.id);
    };
    let identifier = match get_required_str(&req.params, "identifier") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let canvas_id = roster.index().lookup(&identifier);
    let display_name = canvas_id
        .and_then(|id| roster.member(id))
        .and_then(|m| m.display_name());
    ok(
        &req.id,
        json!({ "canvasId": canvas_id, "displayName": display_name }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "roster.load" => Some(handle_roster_load(state, req)),
        "roster.lookup" => Some(handle_roster_lookup(state, req)),
        _ => None,
    }
}
