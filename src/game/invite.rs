//! Party and pledge invitations
//!
//! Invitation flow: the inviter asks, the target answers, and an unanswered
//! invitation auto-declines after [`INVITE_TIMEOUT`]. Both sides carry a
//! request for the duration so neither can start a second invitation of the
//! same scope, and any resolution — answer, timeout, or disconnect — clears
//! both sides together.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::game::player::{Player, World};
use crate::game::request::{
    ActiveRequest, RequestError, RequestKind, RequestPayload, INVITE_TIMEOUT,
};
use crate::network::flood::FloodAction;

pub const OP_INVITE_ASK: u8 = 0x74;
pub const OP_INVITE_RESULT: u8 = 0x75;

/// Which membership an invitation grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteScope {
    Party,
    Pledge,
}

/// A pending invitation; both sides' requests carry a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invite {
    pub scope: InviteScope,
    pub inviter: u32,
    pub target: u32,
}

fn kind(scope: InviteScope) -> RequestKind {
    match scope {
        InviteScope::Party => RequestKind::PartyInvite,
        InviteScope::Pledge => RequestKind::PledgeInvite,
    }
}

fn scope_code(scope: InviteScope) -> u8 {
    match scope {
        InviteScope::Party => 0,
        InviteScope::Pledge => 1,
    }
}

/// Ask the target whether they accept `inviter_id`'s invitation.
pub fn build_invite_ask(scope: InviteScope, inviter_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(OP_INVITE_ASK);
    buf.put_u8(scope_code(scope));
    buf.put_u32_le(inviter_id);
    buf.freeze()
}

/// Outcome, sent to both parties.
pub fn build_invite_result(scope: InviteScope, ok: bool) -> Bytes {
    Bytes::from(vec![OP_INVITE_RESULT, scope_code(scope), ok as u8])
}

pub fn invite_to_party(
    world: &Arc<World>,
    me: &Arc<Player>,
    target_id: u32,
) -> Result<(), RequestError> {
    send_invite(world, me, target_id, InviteScope::Party)
}

pub fn invite_to_pledge(
    world: &Arc<World>,
    me: &Arc<Player>,
    target_id: u32,
) -> Result<(), RequestError> {
    send_invite(world, me, target_id, InviteScope::Pledge)
}

fn send_invite(
    world: &Arc<World>,
    me: &Arc<Player>,
    target_id: u32,
    scope: InviteScope,
) -> Result<(), RequestError> {
    if !me.session.can_perform(FloodAction::PlayerAction) {
        return Ok(());
    }
    if target_id == me.id() {
        return Err(RequestError::SelfTarget);
    }
    let target = world
        .player(target_id)
        .ok_or(RequestError::TargetNotFound(target_id))?;
    if target.session.is_closed() {
        return Err(RequestError::TargetBusy(target_id));
    }
    let already_member = match scope {
        InviteScope::Party => target.party().is_some(),
        InviteScope::Pledge => target.pledge().is_some(),
    };
    if already_member {
        return Err(RequestError::Invalid("target already belongs to one"));
    }

    let invite = Invite {
        scope,
        inviter: me.id(),
        target: target_id,
    };
    let now = world.clock().now();

    let my_request = ActiveRequest::new(
        kind(scope),
        now,
        Some(target_id),
        RequestPayload::Invite(invite),
    );
    me.requests.attach_if_absent(&my_request)?;

    let their_request = ActiveRequest::new(
        kind(scope),
        now,
        Some(me.id()),
        RequestPayload::Invite(invite),
    );
    if target.requests.attach_if_absent(&their_request).is_err() {
        my_request.resolve();
        me.requests.detach(&my_request);
        return Err(RequestError::TargetBusy(target_id));
    }

    // auto-decline task; the handle lives on the target's request and dies
    // with it. Skipped outside a runtime.
    if let Ok(rt) = tokio::runtime::Handle::try_current() {
        let world_w = Arc::downgrade(world);
        let mine_w = Arc::downgrade(&my_request);
        let theirs_w = Arc::downgrade(&their_request);
        let handle = rt.spawn(async move {
            tokio::time::sleep(INVITE_TIMEOUT).await;
            let (Some(world), Some(mine), Some(theirs)) =
                (world_w.upgrade(), mine_w.upgrade(), theirs_w.upgrade())
            else {
                return;
            };
            decline_pair(&world, &invite, &mine, &theirs, "timed out");
        });
        their_request.set_timeout(handle);
    }

    tracing::debug!(
        "[invite] [asked] scope={:?} from={}({}) to={}",
        scope,
        me.name(),
        me.id(),
        target_id
    );
    target.session.send(build_invite_ask(scope, me.id()));
    Ok(())
}

/// Resolve and detach both halves of an invitation, telling both parties it
/// was declined. Safe against superseded requests: detach is object-exact.
fn decline_pair(
    world: &World,
    invite: &Invite,
    mine: &Arc<ActiveRequest>,
    theirs: &Arc<ActiveRequest>,
    reason: &str,
) {
    let newly = mine.resolve() | theirs.resolve();
    if !newly {
        return;
    }

    tracing::debug!(
        "[invite] [declined] scope={:?} inviter={} target={} reason={}",
        invite.scope,
        invite.inviter,
        invite.target,
        reason
    );

    for (id, request) in [(invite.inviter, mine), (invite.target, theirs)] {
        if let Some(p) = world.player(id) {
            p.requests.detach(request);
            p.session.send(build_invite_result(invite.scope, false));
        }
    }
}

pub fn answer_party_invite(
    world: &World,
    me: &Arc<Player>,
    accept: bool,
) -> Result<(), RequestError> {
    answer_invite(world, me, InviteScope::Party, accept)
}

pub fn answer_pledge_invite(
    world: &World,
    me: &Arc<Player>,
    accept: bool,
) -> Result<(), RequestError> {
    answer_invite(world, me, InviteScope::Pledge, accept)
}

fn answer_invite(
    world: &World,
    me: &Arc<Player>,
    scope: InviteScope,
    accept: bool,
) -> Result<(), RequestError> {
    let my_request = me
        .requests
        .get(kind(scope))
        .ok_or(RequestError::NoRequest(kind(scope)))?;
    let invite = *my_request
        .invite()
        .ok_or(RequestError::NoRequest(kind(scope)))?;
    if me.id() != invite.target {
        return Err(RequestError::Invalid("inviter cannot answer own invitation"));
    }

    my_request.resolve();
    me.requests.detach(&my_request);

    let inviter = match world.player(invite.inviter) {
        Some(p) => p,
        None => {
            me.session.send(build_invite_result(scope, false));
            return Err(RequestError::PartnerGone);
        }
    };
    if let Some(their_request) = matching_request(&inviter, &invite) {
        their_request.resolve();
        inviter.requests.detach(&their_request);
    }

    if accept {
        match scope {
            InviteScope::Party => {
                // the inviter's party, or a fresh one keyed by their id
                let party_id = inviter.party().unwrap_or_else(|| inviter.id());
                inviter.set_party(Some(party_id));
                me.set_party(Some(party_id));
            }
            InviteScope::Pledge => {
                let pledge_id = inviter.pledge().unwrap_or_else(|| inviter.id());
                inviter.set_pledge(Some(pledge_id));
                me.set_pledge(Some(pledge_id));
            }
        }
        tracing::info!(
            "[invite] [accepted] scope={:?} inviter={} target={}",
            scope,
            invite.inviter,
            invite.target
        );
    }

    let frame = build_invite_result(scope, accept);
    me.session.send(frame.clone());
    inviter.session.send(frame);
    Ok(())
}

/// The player's live request for this exact invitation, if any.
fn matching_request(player: &Player, invite: &Invite) -> Option<Arc<ActiveRequest>> {
    let request = player.requests.get(kind(invite.scope))?;
    match request.invite() {
        Some(i) if i == invite => Some(request),
        _ => None,
    }
}

/// Disconnect path entry; the disconnecting player's slot is already drained,
/// so only the surviving side needs cleanup.
pub(crate) fn disconnect_cancel(world: &World, invite: &Invite) {
    for id in [invite.inviter, invite.target] {
        if let Some(p) = world.player(id) {
            if let Some(request) = matching_request(&p, invite) {
                request.resolve();
                p.requests.detach(&request);
                p.session.send(build_invite_result(invite.scope, false));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::testutil::{drain_frames, online_player, test_world};

    #[test]
    fn test_invite_attaches_both_and_asks_target() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, mut br) = online_player(&world, 2, "Bran");

        invite_to_party(&world, &a, b.id()).unwrap();

        assert!(a.requests.get(RequestKind::PartyInvite).is_some());
        assert!(b.requests.get(RequestKind::PartyInvite).is_some());
        assert!(drain_frames(&mut br).contains(&build_invite_ask(InviteScope::Party, a.id())));
    }

    #[test]
    fn test_accept_joins_party_and_clears_both() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        invite_to_party(&world, &a, b.id()).unwrap();
        answer_party_invite(&world, &b, true).unwrap();

        assert_eq!(a.party(), Some(a.id()));
        assert_eq!(b.party(), Some(a.id()));
        assert!(a.requests.get(RequestKind::PartyInvite).is_none());
        assert!(b.requests.get(RequestKind::PartyInvite).is_none());
        assert!(drain_frames(&mut ar).contains(&build_invite_result(InviteScope::Party, true)));
    }

    #[test]
    fn test_decline_leaves_memberships_untouched() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        invite_to_pledge(&world, &a, b.id()).unwrap();
        answer_pledge_invite(&world, &b, false).unwrap();

        assert_eq!(a.pledge(), None);
        assert_eq!(b.pledge(), None);
        assert!(a.requests.get(RequestKind::PledgeInvite).is_none());
        assert!(b.requests.get(RequestKind::PledgeInvite).is_none());
        assert!(drain_frames(&mut ar).contains(&build_invite_result(InviteScope::Pledge, false)));
    }

    #[test]
    fn test_target_with_pending_invite_rolls_back_inviter() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");
        let (c, _cr) = online_player(&world, 3, "Cale");

        // c already has a pending party invite from b
        invite_to_party(&world, &b, c.id()).unwrap();

        let err = invite_to_party(&world, &a, c.id()).unwrap_err();
        assert!(matches!(err, RequestError::TargetBusy(3)));
        assert!(
            a.requests.get(RequestKind::PartyInvite).is_none(),
            "failed invite must not leave a dangling slot"
        );
    }

    #[test]
    fn test_party_and_pledge_invites_are_independent_slots() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        invite_to_party(&world, &a, b.id()).unwrap();
        world.clock().advance(10); // past the player-action window
        invite_to_pledge(&world, &a, b.id()).unwrap();

        assert_eq!(a.requests.len(), 2);
        assert_eq!(b.requests.len(), 2);
    }

    #[test]
    fn test_inviter_disconnect_clears_target_side() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, mut br) = online_player(&world, 2, "Bran");

        invite_to_party(&world, &a, b.id()).unwrap();
        world.disconnect(&a);

        assert!(b.requests.get(RequestKind::PartyInvite).is_none());
        assert!(drain_frames(&mut br).contains(&build_invite_result(InviteScope::Party, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_invite_auto_declines() {
        let world = test_world();
        let (a, mut ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        invite_to_party(&world, &a, b.id()).unwrap();
        assert!(b.requests.get(RequestKind::PartyInvite).is_some());

        tokio::time::sleep(INVITE_TIMEOUT + std::time::Duration::from_millis(100)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(a.requests.get(RequestKind::PartyInvite).is_none());
        assert!(b.requests.get(RequestKind::PartyInvite).is_none());
        assert_eq!(a.party(), None);
        assert!(drain_frames(&mut ar).contains(&build_invite_result(InviteScope::Party, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_beats_timeout() {
        let world = test_world();
        let (a, _ar) = online_player(&world, 1, "Aria");
        let (b, _br) = online_player(&world, 2, "Bran");

        invite_to_party(&world, &a, b.id()).unwrap();
        answer_party_invite(&world, &b, true).unwrap();

        tokio::time::sleep(INVITE_TIMEOUT + std::time::Duration::from_millis(100)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        // the aborted timer must not undo the accepted membership
        assert_eq!(a.party(), Some(a.id()));
        assert_eq!(b.party(), Some(a.id()));
    }
}
