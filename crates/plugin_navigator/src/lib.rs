//! Travel commands for the Conduit proxy.
//!
//! Registers `/goto <x> <y> <z>`, `/gotoxz <x> <z> [range]` and `/pathstop`
//! into the connected command tree. The actual path planning is an external
//! collaborator behind [`TravelPlanner`]; this plugin only coordinates
//! control transfer around a trip: the controlling client is unlinked while
//! the planner drives, then re-linked and re-synced when the trip ends.

use async_trait::async_trait;
use conduit_core::{
    handler, ClientId, CommandNode, CommandScope, CommandTree, ConduitServer, CoreError,
    Extension, ExtensionBindings, ExtensionError, LifecycleKind, Visibility,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a trip should end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TravelGoal {
    /// An exact block position.
    Block { x: f64, y: f64, z: f64 },
    /// Anywhere within `range` of an XZ column.
    NearXz { x: f64, z: f64, range: f64 },
}

/// Travel failures reported by the planner.
#[derive(Debug, thiserror::Error)]
pub enum TravelError {
    #[error("no path to the goal: {0}")]
    Unreachable(String),
    #[error("travel halted")]
    Halted,
}

/// The movement collaborator. Path planning and execution live outside the
/// proxy core; the plugin only issues goals and halts.
#[async_trait]
pub trait TravelPlanner: Send + Sync {
    /// Current position of the session's avatar.
    async fn position(&self) -> (f64, f64, f64);

    /// Drives the session to `goal`, returning when the trip ends.
    async fn travel_to(&self, goal: TravelGoal) -> Result<(), TravelError>;

    /// Abandons the current trip, if any.
    fn halt(&self);
}

/// Proxy extension wiring travel commands to a [`TravelPlanner`].
pub struct NavigatorPlugin {
    planner: Arc<dyn TravelPlanner>,
}

impl NavigatorPlugin {
    pub fn new(planner: Arc<dyn TravelPlanner>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl Extension for NavigatorPlugin {
    fn name(&self) -> &str {
        "navigator"
    }

    fn version(&self) -> &str {
        "0.3.0"
    }

    async fn on_load(
        &self,
        server: &Arc<ConduitServer>,
        bindings: &Arc<ExtensionBindings>,
    ) -> Result<(), ExtensionError> {
        // A dead upstream session invalidates any trip in progress.
        let planner = self.planner.clone();
        bindings
            .bind(LifecycleKind::RemoteDisconnected, move |_| {
                planner.halt();
                Ok(())
            })
            .await?;

        let goto = travel_command(server, &self.planner, TravelKind::Block);
        let gotoxz = travel_command(server, &self.planner, TravelKind::NearXz);

        let srv = Arc::downgrade(server);
        let planner = self.planner.clone();
        let pathstop = handler(move |client, _args| {
            let srv = srv.clone();
            let planner = planner.clone();
            async move {
                let Some(server) = srv.upgrade() else {
                    return Ok(());
                };
                planner.halt();
                server.message(client, "Stopped pathfinding!").await;
                sync_client_position(&server, client, planner.position().await).await;
                server.link(client).await?;
                Ok(())
            }
        });

        server
            .register_commands(
                CommandScope::Connected,
                CommandTree::new()
                    .command(
                        "goto",
                        CommandNode::new(goto)
                            .with_usage("goto <x> <y> <z>")
                            .with_description("go from point A to point B")
                            .with_visibility(Visibility::OnlyControlling),
                    )
                    .command(
                        "gotoxz",
                        CommandNode::new(gotoxz)
                            .with_usage("gotoxz <x> <z> [range]")
                            .with_description("go from point A to point B, XZ")
                            .with_visibility(Visibility::OnlyControlling),
                    )
                    .command(
                        "pathstop",
                        CommandNode::new(pathstop)
                            .with_usage("pathstop")
                            .with_description("stop the active trip")
                            .with_visibility(Visibility::OnlyNotControlling),
                    ),
            )
            .await;

        info!("navigator commands registered");
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum TravelKind {
    Block,
    NearXz,
}

fn travel_command(
    server: &Arc<ConduitServer>,
    planner: &Arc<dyn TravelPlanner>,
    kind: TravelKind,
) -> conduit_core::CommandFn {
    let srv = Arc::downgrade(server);
    let planner = planner.clone();
    handler(move |client, args| {
        let srv = srv.clone();
        let planner = planner.clone();
        async move {
            let Some(server) = srv.upgrade() else {
                return Ok(());
            };
            if !server.is_controlling(client).await {
                server
                    .message(client, "You cannot move the session, you are not controlling it!")
                    .await;
                return Ok(());
            }
            let Some(goal) = parse_goal(kind, &args, planner.position().await) else {
                let usage = match kind {
                    TravelKind::Block => "Usage: goto <x> <y> <z>",
                    TravelKind::NearXz => "Usage: gotoxz <x> <z> [range]",
                };
                server.message(client, usage).await;
                return Ok(());
            };
            travel(&server, &planner, client, goal).await
        }
    })
}

async fn travel(
    server: &Arc<ConduitServer>,
    planner: &Arc<dyn TravelPlanner>,
    client: ClientId,
    goal: TravelGoal,
) -> Result<(), CoreError> {
    let described = describe(goal);
    server.message(client, &format!("Moving to: {described}")).await;
    server.share_data("navigator:last_goal", json!(described));

    // Release the client so the planner can drive.
    planner.halt();
    server.unlink(client).await?;

    match planner.travel_to(goal).await {
        Ok(()) => {
            server.message(client, "Made it!").await;
            debug!(client = %client, goal = %described, "trip finished");
        }
        Err(e) => {
            server.message(client, "Did not make it...").await;
            debug!(client = %client, goal = %described, "trip failed: {e}");
        }
    }

    // Clean up: hand control back to the requester.
    sync_client_position(server, client, planner.position().await).await;
    server.link(client).await?;
    Ok(())
}

/// Snaps the client's camera back to the avatar before re-linking.
async fn sync_client_position(server: &Arc<ConduitServer>, client: ClientId, at: (f64, f64, f64)) {
    let Some(handle) = server.clients().get(client) else {
        return;
    };
    handle
        .write(
            "position",
            json!({
                "x": at.0,
                "y": at.1,
                "z": at.2,
                "yaw": 0,
                "pitch": 0,
                "onGround": true,
            }),
        )
        .await;
}

fn parse_goal(kind: TravelKind, args: &[String], current: (f64, f64, f64)) -> Option<TravelGoal> {
    match kind {
        TravelKind::Block => {
            let [x, y, z] = args else { return None };
            Some(TravelGoal::Block {
                x: parse_coord(x, current.0)?,
                y: parse_coord(y, current.1)?,
                z: parse_coord(z, current.2)?,
            })
        }
        TravelKind::NearXz => {
            let (x, z, range) = match args {
                [x, z] => (x, z, None),
                [x, z, range] => (x, z, Some(range)),
                _ => return None,
            };
            Some(TravelGoal::NearXz {
                x: parse_coord(x, current.0)?,
                z: parse_coord(z, current.2)?,
                range: match range {
                    Some(r) => r.parse().ok()?,
                    None => 3.0,
                },
            })
        }
    }
}

/// `~` means "where the avatar is now", per command convention.
fn parse_coord(token: &str, current: f64) -> Option<f64> {
    if token == "~" {
        Some(current)
    } else {
        token.parse().ok()
    }
}

fn describe(goal: TravelGoal) -> String {
    match goal {
        TravelGoal::Block { x, y, z } => format!("{x} {y} {z}"),
        TravelGoal::NearXz { x, z, range } => format!("({x}, {z}) w/ range {range}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_resolves_to_the_current_coordinate() {
        assert_eq!(parse_coord("~", 12.5), Some(12.5));
        assert_eq!(parse_coord("64", 12.5), Some(64.0));
        assert_eq!(parse_coord("not-a-number", 0.0), None);
    }

    #[test]
    fn block_goal_requires_three_coordinates() {
        let args: Vec<String> = vec!["10".into(), "64".into(), "10".into()];
        assert_eq!(
            parse_goal(TravelKind::Block, &args, (0.0, 0.0, 0.0)),
            Some(TravelGoal::Block {
                x: 10.0,
                y: 64.0,
                z: 10.0
            })
        );
        let short: Vec<String> = vec!["10".into(), "64".into()];
        assert_eq!(parse_goal(TravelKind::Block, &short, (0.0, 0.0, 0.0)), None);
    }

    #[test]
    fn xz_goal_defaults_the_range() {
        let args: Vec<String> = vec!["100".into(), "-20".into()];
        assert_eq!(
            parse_goal(TravelKind::NearXz, &args, (0.0, 0.0, 0.0)),
            Some(TravelGoal::NearXz {
                x: 100.0,
                z: -20.0,
                range: 3.0
            })
        );
    }

    #[test]
    fn relative_goal_uses_the_avatar_position() {
        let args: Vec<String> = vec!["~".into(), "~".into(), "40".into()];
        assert_eq!(
            parse_goal(TravelKind::Block, &args, (7.0, 64.0, -3.0)),
            Some(TravelGoal::Block {
                x: 7.0,
                y: 64.0,
                z: 40.0
            })
        );
    }
}
