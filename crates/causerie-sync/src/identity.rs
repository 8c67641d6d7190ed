//! Identity Resolver: maps participants to conversation ids.

use std::collections::BTreeSet;

use causerie_shared::constants::DIRECT_ID_SEPARATOR;
use causerie_shared::{ChatError, ConversationId, UserId};

/// Direct conversation id: the two ids sorted ascending and joined with
/// [`DIRECT_ID_SEPARATOR`].  Commutative in its arguments.
pub fn resolve_direct(a: &UserId, b: &UserId) -> ConversationId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    ConversationId::from_raw(format!("{lo}{DIRECT_ID_SEPARATOR}{hi}"))
}

/// Allocate a fresh group id.  Fails when fewer than two participants are
/// given or the list contains duplicates.  The id does not depend on the
/// membership.
pub fn create_group(participants: &[UserId]) -> Result<ConversationId, ChatError> {
    if participants.len() < 2 {
        return Err(ChatError::InvalidMembership(format!(
            "a group needs at least 2 participants, got {}",
            participants.len()
        )));
    }

    let distinct: BTreeSet<&UserId> = participants.iter().collect();
    if distinct.len() != participants.len() {
        return Err(ChatError::InvalidMembership(
            "duplicate participant in group".into(),
        ));
    }

    Ok(ConversationId::new_group())
}

/// Split a canonical direct id back into its participants.  `None` for
/// group ids and anything [`resolve_direct`] could not have produced.
pub fn participants_of_direct(id: &ConversationId) -> Option<(UserId, UserId)> {
    if id.is_group() {
        return None;
    }
    let (a, b) = id.as_str().split_once(DIRECT_ID_SEPARATOR)?;
    let a = UserId::parse(a).ok()?;
    let b = UserId::parse(b).ok()?;
    (a < b).then_some((a, b))
}
