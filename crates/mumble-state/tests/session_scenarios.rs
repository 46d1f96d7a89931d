use mumble_core::protocol::OutboundRequest;
use mumble_core::TreeLayout;
use mumble_prefs::MemoryPreferences;
use mumble_state::{DisplayChannel, EntityStore, SessionController, SessionPhase};
use serde_json::{json, Value};

type Controller = SessionController<Vec<OutboundRequest>, MemoryPreferences>;

fn controller() -> Controller {
    let mut controller = SessionController::new(Vec::new(), MemoryPreferences::new());
    controller.transport_opened();
    controller
}

fn send(controller: &mut Controller, frame: Value) {
    controller.handle_text(&frame.to_string());
}

fn user(id: u32, name: &str) -> Value {
    json!({"id": id, "name": name})
}

fn channel(id: u32, name: &str, parent: i64, users: Vec<Value>) -> Value {
    json!({"id": id, "name": name, "parentId": parent, "users": users})
}

fn snapshot(channels: Vec<Value>) -> Value {
    json!({"type": "response/channels", "channels": channels})
}

fn standard_snapshot() -> Value {
    snapshot(vec![
        channel(0, "Root", -1, vec![user(1, "bob")]),
        channel(1, "Lobby", 0, vec![user(2, "Alice"), user(3, "carol")]),
        channel(2, "Games", 1, vec![]),
        channel(3, "AFK", 0, vec![user(4, "dave")]),
    ])
}

fn names(channel: &DisplayChannel) -> Vec<String> {
    let mut out = vec![channel.name.clone()];
    for sub in &channel.subchannels {
        out.extend(names(sub));
    }
    out
}

fn reachable_user_ids(channel: &DisplayChannel) -> Vec<u32> {
    let mut out: Vec<u32> = channel.users.iter().map(|user| user.id).collect();
    for sub in &channel.subchannels {
        out.extend(reachable_user_ids(sub));
    }
    out
}

fn assert_membership(store: &EntityStore) {
    assert!(store.membership_consistent(), "membership drifted: {store:?}");
}

#[test]
fn applying_the_same_snapshot_twice_is_idempotent() {
    let mut controller = controller();
    send(&mut controller, standard_snapshot());
    let first_store = controller.store().clone();
    let first_view = controller.view().expect("view");

    send(&mut controller, standard_snapshot());
    assert_eq!(controller.store(), &first_store);
    assert_eq!(controller.view().expect("view"), first_view);
    assert_eq!(controller.phase(), SessionPhase::SessionSynced);
}

#[test]
fn membership_holds_after_every_event() {
    let mut controller = controller();
    send(&mut controller, standard_snapshot());
    assert_membership(controller.store());

    let events = vec![
        json!({"type": "event/user_added", "user": user(10, "erin")}),
        json!({"type": "event/channel_entered", "user": user(10, "erin"),
               "toChannel": channel(2, "Games", 1, vec![])}),
        json!({"type": "event/channel_exited", "user": user(2, "Alice")}),
        json!({"type": "event/channel_entered", "user": user(2, "Alice"),
               "toChannel": channel(3, "AFK", 0, vec![])}),
        json!({"type": "event/channel_added", "channel": channel(7, "Music", 3, vec![])}),
        json!({"type": "event/channel_entered", "user": user(4, "dave"),
               "toChannel": channel(7, "Music", 3, vec![])}),
        json!({"type": "event/channel_renamed", "channel": {"id": 7, "name": "Radio"}}),
        json!({"type": "event/user_removed", "id": 3}),
        json!({"type": "event/user_removed", "id": 3}),
        json!({"type": "event/channel_removed", "id": 3}),
        json!({"type": "event/channel_removed", "id": 99}),
    ];
    for event in events {
        send(&mut controller, event);
        assert_membership(controller.store());
    }

    let store = controller.store();
    assert!(store.user(3).is_none());
    assert_eq!(store.user(10).and_then(|u| u.channel_id), Some(2));
    assert!(store.channel(7).is_none());
}

#[test]
fn channel_removal_cascades_and_clears_members() {
    let mut controller = controller();
    send(&mut controller, standard_snapshot());
    send(&mut controller, json!({"type": "event/channel_removed", "id": 1}));

    let store = controller.store();
    assert!(store.channel(1).is_none());
    assert!(store.channel(2).is_none());
    for id in [2, 3] {
        let placed = store.user(id).expect("user kept").channel_id;
        assert_eq!(placed, None);
    }
    assert_membership(store);

    let view = controller.view().expect("view");
    assert_eq!(names(&view.root), vec!["Root", "AFK"]);
}

#[test]
fn members_are_sorted_case_insensitively() {
    let mut controller = controller();
    send(
        &mut controller,
        snapshot(vec![channel(
            0,
            "Root",
            -1,
            vec![user(1, "bob"), user(2, "Alice"), user(3, "carol")],
        )]),
    );
    let view = controller.view().expect("view");
    let order: Vec<&str> = view.root.users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(order, vec!["Alice", "bob", "carol"]);
}

#[test]
fn accented_names_sort_by_base_letter() {
    let mut controller = controller();
    send(
        &mut controller,
        snapshot(vec![
            channel(0, "Root", -1, vec![user(1, "Zed"), user(2, "Émile"), user(3, "Eve")]),
            channel(1, "Zone", 0, vec![]),
            channel(2, "Écurie", 0, vec![]),
        ]),
    );
    let view = controller.view().expect("view");
    let order: Vec<&str> = view.root.users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(order, vec!["Émile", "Eve", "Zed"]);
    assert_eq!(names(&view.root), vec!["Root", "Écurie", "Zone"]);
}

#[test]
fn populated_only_keeps_branches_leading_to_users() {
    let mut controller = controller();
    controller.set_layout(TreeLayout::PopulatedOnly);
    send(
        &mut controller,
        snapshot(vec![
            channel(0, "root", -1, vec![]),
            channel(1, "A", 0, vec![user(1, "a1"), user(2, "a2")]),
            channel(2, "B", 0, vec![]),
            channel(3, "C", 2, vec![user(3, "c1")]),
            channel(4, "Empty", 0, vec![]),
        ]),
    );
    let view = controller.view().expect("view");
    assert_eq!(view.layout, TreeLayout::PopulatedOnly);
    assert_eq!(names(&view.root), vec!["root", "A", "B", "C"]);
    assert_eq!(view.find(2).map(DisplayChannel::total_users), Some(1));
}

#[test]
fn current_channel_shows_only_the_local_path() {
    let mut controller = controller();
    controller.set_layout(TreeLayout::CurrentChannel);
    send(
        &mut controller,
        snapshot(vec![
            channel(0, "root", -1, vec![user(1, "r")]),
            channel(1, "X", 0, vec![user(2, "x")]),
            channel(2, "X sibling", 0, vec![user(3, "s")]),
            channel(3, "Y", 1, vec![user(9, "me")]),
            channel(4, "Y sibling", 1, vec![]),
        ]),
    );
    send(&mut controller, json!({"type": "response/local_user_id", "id": 9}));

    let view = controller.view().expect("view");
    assert_eq!(names(&view.root), vec!["root", "X", "Y"]);
    assert!(view.root.users.is_empty());
    assert!(view.find(1).expect("X").users.is_empty());
    assert_eq!(reachable_user_ids(&view.root), vec![9]);

    send(
        &mut controller,
        json!({"type": "event/channel_entered", "user": user(9, "me"),
               "toChannel": channel(2, "X sibling", 0, vec![])}),
    );
    let view = controller.view().expect("view");
    assert_eq!(names(&view.root), vec!["root", "X sibling"]);
}

#[test]
fn channel_entered_before_user_added_self_heals() {
    let mut controller = controller();
    send(&mut controller, standard_snapshot());
    send(
        &mut controller,
        json!({"type": "event/channel_entered", "user": user(20, "late"),
               "toChannel": channel(2, "Games", 1, vec![])}),
    );

    let store = controller.store();
    let late = store.user(20).expect("synthesized user");
    assert_eq!(late.channel_id, Some(2));
    assert_eq!(late.flags, Default::default());
    assert_eq!(late.talking_state, Default::default());
    assert_membership(store);

    send(&mut controller, json!({"type": "event/user_added", "user": user(20, "late")}));
    assert_eq!(controller.store().user(20).and_then(|u| u.channel_id), Some(2));
}

#[test]
fn reconnect_snapshot_replaces_the_previous_session() {
    let mut controller = controller();
    send(&mut controller, standard_snapshot());
    controller.transport_closed();
    assert_eq!(controller.phase(), SessionPhase::Disconnected);

    send(&mut controller, json!({"type": "event/user_added", "user": user(50, "ghost")}));
    assert!(controller.store().user(50).is_none());

    controller.transport_opened();
    send(
        &mut controller,
        snapshot(vec![
            channel(0, "New root", -1, vec![user(100, "zed")]),
            channel(40, "Fresh", 0, vec![]),
        ]),
    );

    let store = controller.store();
    for stale_channel in [1, 2, 3] {
        assert!(store.channel(stale_channel).is_none());
    }
    for stale_user in [1, 2, 3, 4] {
        assert!(store.user(stale_user).is_none());
    }
    let view = controller.view().expect("view");
    assert_eq!(names(&view.root), vec!["New root", "Fresh"]);
    assert_eq!(reachable_user_ids(&view.root), vec![100]);
}

#[test]
fn talking_and_flag_updates_reach_the_view() {
    let mut controller = controller();
    send(&mut controller, standard_snapshot());
    send(
        &mut controller,
        json!({"type": "event/user_talking_state_changed", "user": user(1, "bob"), "talkingState": 1}),
    );
    send(
        &mut controller,
        json!({"type": "event/user_mute_deafen_state_changed", "user": user(1, "bob"),
               "selfDeafened": true}),
    );
    let view = controller.view().expect("view");
    let bob = &view.root.users[0];
    assert!(bob.talking_state.is_speaking());
    assert!(bob.flags.self_deafened);
    assert!(!bob.flags.muted);
}

#[test]
fn parent_cycles_never_reach_the_view() {
    let mut controller = controller();
    send(
        &mut controller,
        snapshot(vec![
            channel(0, "root", -1, vec![]),
            channel(1, "loop a", 2, vec![user(1, "stuck")]),
            channel(2, "loop b", 1, vec![]),
            channel(3, "fine", 0, vec![]),
        ]),
    );
    assert_eq!(controller.hierarchy_report().cyclic, vec![1, 2]);
    let view = controller.view().expect("view");
    assert_eq!(names(&view.root), vec!["root", "fine"]);
    assert_membership(controller.store());
}
