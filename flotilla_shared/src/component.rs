//! Component container and the typed kind registry.
//!
//! Component kinds form a closed enum resolved with one `match` instead of a
//! stringly-typed constructor lookup; the historical names stay as wire
//! discriminators. Every component is a state store plus optional network
//! metadata, identified by a [`ComponentId`] that is stable across the
//! network.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::board::BoardState;
use crate::error::GameError;
use crate::field::FieldState;
use crate::game::TickOptions;
use crate::gun_attack::GunAttackState;
use crate::hitpoints::HitpointsState;
use crate::identity::{ComponentId, ConnectionId, NetworkId, Role};
use crate::inventory::InventoryState;
use crate::item::ItemState;
use crate::moveable::MoveableState;
use crate::network_component::{NetMeta, NetworkObjectState};
use crate::position::PositionState;
use crate::selectable::SelectableState;
use crate::ship::ShipState;
use crate::store::Store;
use crate::supply_crate::CrateState;
use crate::targetable::TargetableState;

/// Closed set of component kinds. The string names are the stable network
/// type discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Board,
    Crate,
    Field,
    GunAttack,
    Hitpoints,
    Inventory,
    Item,
    Moveable,
    NetworkObject,
    Position,
    Selectable,
    Ship,
    Targetable,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Board => "Board",
            ComponentKind::Crate => "Crate",
            ComponentKind::Field => "Field",
            ComponentKind::GunAttack => "GunAttack",
            ComponentKind::Hitpoints => "Hitpoints",
            ComponentKind::Inventory => "Inventory",
            ComponentKind::Item => "Item",
            ComponentKind::Moveable => "Moveable",
            ComponentKind::NetworkObject => "NetworkObject",
            ComponentKind::Position => "Position",
            ComponentKind::Selectable => "Selectable",
            ComponentKind::Ship => "Ship",
            ComponentKind::Targetable => "Targetable",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Board" => Some(ComponentKind::Board),
            "Crate" => Some(ComponentKind::Crate),
            "Field" => Some(ComponentKind::Field),
            "GunAttack" => Some(ComponentKind::GunAttack),
            "Hitpoints" => Some(ComponentKind::Hitpoints),
            "Inventory" => Some(ComponentKind::Inventory),
            "Item" => Some(ComponentKind::Item),
            "Moveable" => Some(ComponentKind::Moveable),
            "NetworkObject" => Some(ComponentKind::NetworkObject),
            "Position" => Some(ComponentKind::Position),
            "Selectable" => Some(ComponentKind::Selectable),
            "Ship" => Some(ComponentKind::Ship),
            "Targetable" => Some(ComponentKind::Targetable),
            _ => None,
        }
    }

    /// Kinds that carry ownership metadata and replicate.
    pub fn is_networked(self) -> bool {
        matches!(
            self,
            ComponentKind::Crate
                | ComponentKind::Field
                | ComponentKind::GunAttack
                | ComponentKind::Inventory
                | ComponentKind::Moveable
                | ComponentKind::NetworkObject
                | ComponentKind::Position
                | ComponentKind::Ship
        )
    }

    /// Kinds an RPC can target directly by network id.
    pub fn is_rpc_addressable(self) -> bool {
        matches!(
            self,
            ComponentKind::GunAttack | ComponentKind::Moveable | ComponentKind::NetworkObject
        )
    }
}

/// Typed state storage, one variant per kind.
#[derive(Debug)]
pub enum ComponentBody {
    Board(Store<BoardState>),
    Crate(Store<CrateState>),
    Field(Store<FieldState>),
    GunAttack(Store<GunAttackState>),
    Hitpoints(Store<HitpointsState>),
    Inventory(Store<InventoryState>),
    Item(Store<ItemState>),
    Moveable(Store<MoveableState>),
    NetworkObject(Store<NetworkObjectState>),
    Position(Store<PositionState>),
    Selectable(Store<SelectableState>),
    Ship(Store<ShipState>),
    Targetable(Store<TargetableState>),
}

/// Runs an expression against the store of whatever kind the body holds.
macro_rules! with_store {
    ($body:expr, $s:ident => $e:expr) => {
        match $body {
            ComponentBody::Board($s) => $e,
            ComponentBody::Crate($s) => $e,
            ComponentBody::Field($s) => $e,
            ComponentBody::GunAttack($s) => $e,
            ComponentBody::Hitpoints($s) => $e,
            ComponentBody::Inventory($s) => $e,
            ComponentBody::Item($s) => $e,
            ComponentBody::Moveable($s) => $e,
            ComponentBody::NetworkObject($s) => $e,
            ComponentBody::Position($s) => $e,
            ComponentBody::Selectable($s) => $e,
            ComponentBody::Ship($s) => $e,
            ComponentBody::Targetable($s) => $e,
        }
    };
}

/// Wire snapshot of one component: `{id, name, state, ownerId|isOwner}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSnapshot {
    pub id: ComponentId,
    pub name: String,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<ConnectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_owner: Option<bool>,
}

/// A unit of behavior and state attached to exactly one entity.
#[derive(Debug)]
pub struct Component {
    id: ComponentId,
    net: Option<NetMeta>,
    body: ComponentBody,
}

macro_rules! constructors {
    ($($fn_name:ident, $variant:ident, $state:ty;)*) => {
        $(
            pub fn $fn_name(state: $state) -> Self {
                Self::with_id(ComponentId::new_unique(), ComponentBody::$variant(Store::new(state)))
            }
        )*
    };
}

macro_rules! accessors {
    ($($ref_name:ident, $mut_name:ident, $variant:ident, $state:ty;)*) => {
        $(
            pub fn $ref_name(&self) -> Option<&Store<$state>> {
                match &self.body {
                    ComponentBody::$variant(store) => Some(store),
                    _ => None,
                }
            }

            pub fn $mut_name(&mut self) -> Option<&mut Store<$state>> {
                match &mut self.body {
                    ComponentBody::$variant(store) => Some(store),
                    _ => None,
                }
            }
        )*
    };
}

impl Component {
    constructors! {
        board, Board, BoardState;
        supply_crate, Crate, CrateState;
        field, Field, FieldState;
        gun_attack, GunAttack, GunAttackState;
        hitpoints, Hitpoints, HitpointsState;
        inventory, Inventory, InventoryState;
        item, Item, ItemState;
        moveable, Moveable, MoveableState;
        network_object, NetworkObject, NetworkObjectState;
        position, Position, PositionState;
        selectable, Selectable, SelectableState;
        ship, Ship, ShipState;
        targetable, Targetable, TargetableState;
    }

    accessors! {
        as_board, as_board_mut, Board, BoardState;
        as_crate, as_crate_mut, Crate, CrateState;
        as_field, as_field_mut, Field, FieldState;
        as_gun_attack, as_gun_attack_mut, GunAttack, GunAttackState;
        as_hitpoints, as_hitpoints_mut, Hitpoints, HitpointsState;
        as_inventory, as_inventory_mut, Inventory, InventoryState;
        as_item, as_item_mut, Item, ItemState;
        as_moveable, as_moveable_mut, Moveable, MoveableState;
        as_network_object, as_network_object_mut, NetworkObject, NetworkObjectState;
        as_position, as_position_mut, Position, PositionState;
        as_selectable, as_selectable_mut, Selectable, SelectableState;
        as_ship, as_ship_mut, Ship, ShipState;
        as_targetable, as_targetable_mut, Targetable, TargetableState;
    }

    fn with_id(id: ComponentId, body: ComponentBody) -> Self {
        let kind = body_kind(&body);
        let net = kind.is_networked().then(|| {
            let mut meta = NetMeta::default();
            if kind.is_rpc_addressable() {
                meta.network_id = Some(NetworkId(id.0));
            }
            meta
        });
        Self { id, net, body }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn kind(&self) -> ComponentKind {
        body_kind(&self.body)
    }

    pub fn net(&self) -> Option<&NetMeta> {
        self.net.as_ref()
    }

    pub fn net_mut(&mut self) -> Option<&mut NetMeta> {
        self.net.as_mut()
    }

    pub fn network_id(&self) -> Option<NetworkId> {
        self.net.as_ref().and_then(|meta| meta.network_id)
    }

    pub fn owner_id(&self) -> Option<ConnectionId> {
        self.net.as_ref().and_then(|meta| meta.owner_id())
    }

    pub fn is_owner(&self) -> bool {
        self.net.as_ref().map(|meta| meta.is_owner()).unwrap_or(false)
    }

    pub fn is_disabled(&self) -> bool {
        with_store!(&self.body, s => s.get().is_disabled)
    }

    /// Transitions the disabled flag. Returns whether an actual transition
    /// happened, so callers emit enabled/disabled events exactly once.
    pub fn set_disabled(&mut self, disabled: bool) -> bool {
        with_store!(&mut self.body, s => {
            if s.get().is_disabled == disabled {
                false
            } else {
                s.set(|state| state.is_disabled = disabled);
                true
            }
        })
    }

    /// Per-frame hook. Runs every tick for every component; keep it
    /// allocation-light.
    pub fn update(&mut self, _options: &TickOptions) {}

    /// Serialized current state.
    pub fn state_json(&self) -> Value {
        with_store!(&self.body, s => serde_json::to_value(s.get()).expect("serialize component state"))
    }

    /// Applies a server diff to the state store, notifying subscribers. This
    /// is the client-side half of replication.
    pub fn apply_state(&mut self, value: &Value) -> Result<(), GameError> {
        with_store!(&mut self.body, s => {
            let state = serde_json::from_value(value.clone())
                .map_err(|e| GameError::BadRequest(format!("component state: {e}")))?;
            s.replace(state);
            Ok(())
        })
    }

    /// Registers a kind-agnostic state subscriber receiving serialized
    /// state. Used by the replication bridge.
    pub fn subscribe_state(&mut self, mut f: impl FnMut(Value) + Send + 'static) {
        with_store!(&mut self.body, s => {
            s.subscribe(Box::new(move |state| {
                f(serde_json::to_value(state).expect("serialize component state"))
            }));
        })
    }

    /// Wire snapshot. The server includes `ownerId`; the client `isOwner`.
    pub fn snapshot(&self, role: Role) -> ComponentSnapshot {
        let (owner_id, is_owner) = match (&self.net, role) {
            (Some(meta), Role::Server) => (Some(meta.owner_id()), None),
            (Some(meta), Role::Client) => (None, Some(meta.is_owner())),
            (None, _) => (None, None),
        };
        ComponentSnapshot {
            id: self.id,
            name: self.kind().as_str().to_string(),
            state: self.state_json(),
            owner_id: owner_id.flatten(),
            is_owner,
        }
    }

    /// Resolves a wire snapshot back into a component (client spawn path).
    pub fn from_snapshot(snapshot: &ComponentSnapshot) -> Result<Self, GameError> {
        let kind = ComponentKind::from_name(&snapshot.name)
            .ok_or_else(|| GameError::BadRequest(format!("unknown component '{}'", snapshot.name)))?;

        macro_rules! resolve {
            ($variant:ident) => {
                ComponentBody::$variant(Store::new(
                    serde_json::from_value(snapshot.state.clone())
                        .map_err(|e| GameError::BadRequest(format!("component state: {e}")))?,
                ))
            };
        }

        let body = match kind {
            ComponentKind::Board => resolve!(Board),
            ComponentKind::Crate => resolve!(Crate),
            ComponentKind::Field => resolve!(Field),
            ComponentKind::GunAttack => resolve!(GunAttack),
            ComponentKind::Hitpoints => resolve!(Hitpoints),
            ComponentKind::Inventory => resolve!(Inventory),
            ComponentKind::Item => resolve!(Item),
            ComponentKind::Moveable => resolve!(Moveable),
            ComponentKind::NetworkObject => resolve!(NetworkObject),
            ComponentKind::Position => resolve!(Position),
            ComponentKind::Selectable => resolve!(Selectable),
            ComponentKind::Ship => resolve!(Ship),
            ComponentKind::Targetable => resolve!(Targetable),
        };

        let mut component = Self::with_id(snapshot.id, body);
        if let (Some(meta), Some(is_owner)) = (component.net.as_mut(), snapshot.is_owner) {
            meta.set_is_owner(is_owner);
        }
        Ok(component)
    }
}

fn body_kind(body: &ComponentBody) -> ComponentKind {
    match body {
        ComponentBody::Board(_) => ComponentKind::Board,
        ComponentBody::Crate(_) => ComponentKind::Crate,
        ComponentBody::Field(_) => ComponentKind::Field,
        ComponentBody::GunAttack(_) => ComponentKind::GunAttack,
        ComponentBody::Hitpoints(_) => ComponentKind::Hitpoints,
        ComponentBody::Inventory(_) => ComponentKind::Inventory,
        ComponentBody::Item(_) => ComponentKind::Item,
        ComponentBody::Moveable(_) => ComponentKind::Moveable,
        ComponentBody::NetworkObject(_) => ComponentKind::NetworkObject,
        ComponentBody::Position(_) => ComponentKind::Position,
        ComponentBody::Selectable(_) => ComponentKind::Selectable,
        ComponentBody::Ship(_) => ComponentKind::Ship,
        ComponentBody::Targetable(_) => ComponentKind::Targetable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moveable::MoveableState;

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            ComponentKind::Board,
            ComponentKind::Crate,
            ComponentKind::Field,
            ComponentKind::GunAttack,
            ComponentKind::Hitpoints,
            ComponentKind::Inventory,
            ComponentKind::Item,
            ComponentKind::Moveable,
            ComponentKind::NetworkObject,
            ComponentKind::Position,
            ComponentKind::Selectable,
            ComponentKind::Ship,
            ComponentKind::Targetable,
        ] {
            assert_eq!(ComponentKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ComponentKind::from_name("Widget"), None);
    }

    #[test]
    fn set_disabled_reports_transitions_once() {
        let mut component = Component::selectable(SelectableState::default());
        assert!(component.set_disabled(true));
        assert!(!component.set_disabled(true));
        assert!(component.set_disabled(false));
    }

    #[test]
    fn snapshot_carries_role_dependent_ownership() {
        let mut component = Component::moveable(MoveableState::default());
        component
            .net_mut()
            .expect("moveable is networked")
            .set_owner(Role::Server, Some(ConnectionId(7)));

        let server_side = component.snapshot(Role::Server);
        assert_eq!(server_side.owner_id, Some(ConnectionId(7)));
        assert_eq!(server_side.is_owner, None);

        let client_side = component.snapshot(Role::Client);
        assert_eq!(client_side.owner_id, None);
        assert_eq!(client_side.is_owner, Some(false));
    }

    #[test]
    fn snapshot_resolves_back_to_typed_component() {
        let component = Component::moveable(MoveableState {
            movements_done: 1,
            ..Default::default()
        });
        let mut snapshot = component.snapshot(Role::Server);
        snapshot.owner_id = None;
        snapshot.is_owner = Some(true);

        let resolved = Component::from_snapshot(&snapshot).expect("resolve");
        assert_eq!(resolved.id(), component.id());
        assert_eq!(resolved.kind(), ComponentKind::Moveable);
        assert!(resolved.is_owner());
        assert_eq!(resolved.as_moveable().unwrap().get().movements_done, 1);
    }

    #[test]
    fn rpc_addressable_components_share_id_with_network_id() {
        let component = Component::gun_attack(GunAttackState::default());
        assert_eq!(component.network_id().map(|n| n.0), Some(component.id().0));

        let plain = Component::hitpoints(HitpointsState::default());
        assert_eq!(plain.network_id(), None);
        assert!(plain.net().is_none());
    }
}
