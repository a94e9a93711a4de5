//! Radio topology: which ports can hear each other, and how lossy
//! each link is.
//!
//! Ports are physical positions on the [`RadioBus`](crate::RadioBus),
//! assigned at attach time. They are deliberately distinct from
//! protocol node ids, which a node may not even have yet.

use hashbrown::HashMap;

/// A port index on the radio bus.
pub type Port = usize;

/// Properties of a link between two ports.
#[derive(Debug, Clone)]
pub struct Link {
    /// Packet loss rate (0.0 to 1.0), applied per delivery attempt.
    pub loss_rate: f64,
    /// Whether the link currently passes frames.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            active: true,
        }
    }
}

/// Undirected connectivity between bus ports.
///
/// Links are symmetric: `(a, b)` and `(b, a)` are the same link.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(Port, Port), Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain `0 - 1 - 2 - ...`: each port hears only its neighbors.
    pub fn chain(ports: usize) -> Self {
        let mut topo = Self::new();
        for a in 1..ports {
            topo.connect(a - 1, a);
        }
        topo
    }

    /// A star with `hub` in the middle: spokes hear only the hub.
    pub fn star(hub: Port, ports: usize) -> Self {
        let mut topo = Self::new();
        for p in 0..ports {
            if p != hub {
                topo.connect(hub, p);
            }
        }
        topo
    }

    /// Every port hears every other port.
    pub fn fully_connected(ports: usize) -> Self {
        let mut topo = Self::new();
        for a in 0..ports {
            for b in (a + 1)..ports {
                topo.connect(a, b);
            }
        }
        topo
    }

    fn canonical(a: Port, b: Port) -> (Port, Port) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Add a perfect link between two ports.
    pub fn connect(&mut self, a: Port, b: Port) {
        self.connect_with(a, b, Link::default());
    }

    /// Add a link with explicit properties.
    pub fn connect_with(&mut self, a: Port, b: Port, link: Link) {
        if a == b {
            return;
        }
        self.links.insert(Self::canonical(a, b), link);
    }

    /// Remove the link between two ports entirely.
    pub fn disconnect(&mut self, a: Port, b: Port) {
        self.links.remove(&Self::canonical(a, b));
    }

    /// Suspend or resume an existing link without forgetting it.
    pub fn set_active(&mut self, a: Port, b: Port, active: bool) {
        if let Some(link) = self.links.get_mut(&Self::canonical(a, b)) {
            link.active = active;
        }
    }

    /// Set the loss rate on every known link.
    pub fn set_loss_rate(&mut self, loss_rate: f64) {
        for link in self.links.values_mut() {
            link.loss_rate = loss_rate;
        }
    }

    pub fn link(&self, a: Port, b: Port) -> Option<&Link> {
        self.links.get(&Self::canonical(a, b))
    }

    /// Whether a frame from `a` can currently reach `b`.
    pub fn can_hear(&self, a: Port, b: Port) -> bool {
        self.link(a, b).map(|l| l.active).unwrap_or(false)
    }

    /// Ports that can currently hear `from`, among `0..ports`.
    pub fn hearers(&self, from: Port, ports: usize) -> Vec<Port> {
        (0..ports)
            .filter(|&p| p != from && self.can_hear(from, p))
            .collect()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}
