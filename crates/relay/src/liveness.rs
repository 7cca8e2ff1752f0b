// Heartbeat sweep.
//
// Every interval each connection is probed with a ping. A connection
// that has not answered the previous probe by the next sweep is
// terminated and run through the normal disconnect path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::metrics;
use crate::room::RoomRegistry;
use crate::ws::session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rooms: usize,
    pub probed: usize,
    pub terminated: usize,
}

pub struct LivenessMonitor {
    rooms: Arc<RoomRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(rooms: Arc<RoomRegistry>, interval: Duration) -> Self {
        Self { rooms, interval }
    }

    /// Run the sweep on a fixed period until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; fresh connections get a full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    pub async fn sweep(&self) -> SweepReport {
        let rooms = self.rooms.rooms().await;
        let mut report = SweepReport { rooms: rooms.len(), ..SweepReport::default() };

        for room in rooms {
            for connection in room.connections().await {
                if connection.begin_probe() {
                    connection.ping();
                    report.probed += 1;
                    continue;
                }

                warn!(
                    room_id = %connection.room_id(),
                    connection_id = %connection.id(),
                    "terminating connection that missed a heartbeat"
                );
                connection.terminate();
                session::leave(&room, &connection).await;
                metrics::increment_liveness_terminations();
                report.terminated += 1;
            }
        }

        metrics::set_room_count(report.rooms);
        debug!(
            rooms = report.rooms,
            probed = report.probed,
            terminated = report.terminated,
            "liveness sweep finished"
        );
        report
    }
}
