//! Message types and channel wiring between processes.
//!
//! Every process owns one inbox for commands from its superior. Each group
//! leader owns a reply channel shared by its workers, and the root owns a
//! second reply channel shared by the other group leaders. Channels are
//! unbounded, so a send never blocks; only receives suspend.

use std::sync::mpsc::{self, Receiver, Sender};

use convoy_core::{EvaluationRequest, EvaluationResult, OptimError};

use crate::partition::{Partition, ProcessView};

/// Command sent from a superior to a subordinate process.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Enter the dispatch loop
    Mobilize,
    /// Evaluate one request and reply with the result
    Work(EvaluationRequest),
    /// Leave the dispatch loop
    Stop,
}

/// Message sent from a subordinate back to its superior.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledges `Mobilize`
    Mobilized { rank: usize },
    /// Result of a `Work` item
    Completed { rank: usize, result: EvaluationResult },
    /// Acknowledges `Stop`; the sender has left its loop
    Stopped { rank: usize },
}

impl Reply {
    /// Rank of the process that sent the reply.
    pub fn rank(&self) -> usize {
        match self {
            Reply::Mobilized { rank } | Reply::Completed { rank, .. } | Reply::Stopped { rank } => *rank,
        }
    }
}

/// Outgoing half of a superior's view of its subordinates: one command
/// channel per target, one shared reply channel.
#[derive(Debug)]
pub struct Link {
    pub(crate) ranks: Vec<usize>,
    pub(crate) outboxes: Vec<Sender<Envelope>>,
    pub(crate) replies: Receiver<Reply>,
}

impl Link {
    /// World ranks of the targets, in dispatch-slot order.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }
}

/// Everything one process needs to talk to the rest of the cluster.
#[derive(Debug)]
pub struct Endpoint {
    pub(crate) view: ProcessView,
    pub(crate) inbox: Option<Receiver<Envelope>>,
    pub(crate) superior: Option<(usize, Sender<Reply>)>,
    pub(crate) group: Option<Link>,
    pub(crate) leaders: Option<Link>,
}

impl Endpoint {
    /// This process's place in the partition.
    pub fn view(&self) -> &ProcessView {
        &self.view
    }
}

/// Create the endpoints of every process, in rank order.
///
/// All senders not handed to an endpoint are dropped before returning, so a
/// receiver observes disconnection as soon as every process that could
/// write to it has exited.
pub fn wire(partition: &Partition) -> Result<Vec<Endpoint>, OptimError> {
    let world = partition.world_size();
    let (mut inbox_tx, inbox_rx): (Vec<_>, Vec<_>) = (0..world)
        .map(|_| {
            let (tx, rx) = mpsc::channel::<Envelope>();
            (Some(tx), Some(rx))
        })
        .unzip();

    let mut take_outbox = |rank: usize| {
        inbox_tx
            .get_mut(rank)
            .and_then(Option::take)
            .ok_or_else(|| OptimError::InvalidTopology(format!("rank {} wired twice", rank)))
    };

    let mut group_links = Vec::with_capacity(partition.n_groups());
    let mut group_replies = Vec::with_capacity(partition.n_groups());
    for g in 0..partition.n_groups() {
        let (tx, rx) = mpsc::channel::<Reply>();
        let ranks = partition.members(g)[1..].to_vec();
        let outboxes = ranks
            .iter()
            .map(|&r| take_outbox(r))
            .collect::<Result<Vec<_>, _>>()?;
        group_links.push(Some(Link {
            ranks,
            outboxes,
            replies: rx,
        }));
        group_replies.push(tx);
    }

    let (leader_tx, leader_rx) = mpsc::channel::<Reply>();
    let leader_ranks: Vec<usize> = partition.leaders().into_iter().filter(|&r| r != 0).collect();
    let leader_outboxes = leader_ranks
        .iter()
        .map(|&r| take_outbox(r))
        .collect::<Result<Vec<_>, _>>()?;
    let mut root_leaders = Some(Link {
        ranks: leader_ranks,
        outboxes: leader_outboxes,
        replies: leader_rx,
    });

    let endpoints = inbox_rx
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| {
            let view = partition.view(rank);
            let superior = match view.superior() {
                None => None,
                Some(0) if view.is_leader() => Some((0, leader_tx.clone())),
                Some(leader) => Some((leader, group_replies[view.group].clone())),
            };
            Endpoint {
                view,
                inbox: if view.is_root() { None } else { inbox },
                superior,
                group: if view.is_leader() {
                    group_links[view.group].take()
                } else {
                    None
                },
                leaders: if view.is_root() { root_leaders.take() } else { None },
            }
        })
        .collect();

    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wiring_shape() {
        let p = Partition::create(5, 2).unwrap();
        let endpoints = wire(&p).unwrap();
        assert_eq!(endpoints.len(), 5);

        let root = &endpoints[0];
        assert!(root.inbox.is_none() && root.superior.is_none());
        assert_eq!(root.leaders.as_ref().unwrap().ranks(), &[3]);
        assert_eq!(root.group.as_ref().unwrap().ranks(), &[1, 2]);

        let leader = &endpoints[3];
        assert_eq!(leader.superior.as_ref().unwrap().0, 0);
        assert_eq!(leader.group.as_ref().unwrap().ranks(), &[4]);
        assert!(leader.leaders.is_none());

        let worker = &endpoints[4];
        assert_eq!(worker.superior.as_ref().unwrap().0, 3);
        assert!(worker.group.is_none());
    }

    #[test]
    fn test_messages_reach_subordinates() {
        let p = Partition::create(3, 2).unwrap();
        let endpoints = wire(&p).unwrap();
        // group 0 = [0, 1], group 1 = [2]
        let root_group = endpoints[0].group.as_ref().unwrap();
        root_group.outboxes[0].send(Envelope::Mobilize).unwrap();
        assert_eq!(endpoints[1].inbox.as_ref().unwrap().recv().unwrap(), Envelope::Mobilize);

        let (_, superior) = endpoints[2].superior.as_ref().unwrap();
        superior.send(Reply::Mobilized { rank: 2 }).unwrap();
        let reply = endpoints[0].leaders.as_ref().unwrap().replies.recv().unwrap();
        assert_eq!(reply.rank(), 2);
    }

    #[test]
    fn test_receivers_disconnect_when_endpoints_drop() {
        let p = Partition::create(2, 1).unwrap();
        let mut endpoints = wire(&p).unwrap();
        let worker = endpoints.pop().unwrap();
        drop(endpoints);
        assert!(worker.inbox.unwrap().recv().is_err());
    }
}
