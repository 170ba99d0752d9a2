use agromap_core::{Actor, Polygon, Role};

/// Client-side mutation gate. Advisory only: it keeps the UI from offering
/// actions the server would refuse, the server re-checks every request.
///
/// The rules, in order:
/// - DEMO works against its own local store, so everything there is fair game.
/// - SUPER_ADMIN may mutate anything.
/// - ADMIN impersonating a USER may mutate only that user's polygons, not
///   even their own; a non-USER impersonation target grants nothing.
/// - ADMIN without a target, and plain USER, may mutate only what they own.
pub fn can_mutate(actor: &Actor, polygon: &Polygon, impersonation_target: Option<&Actor>) -> bool {
    match actor.role {
        Role::Demo => true,
        Role::SuperAdmin => true,
        Role::Admin => match impersonation_target {
            Some(target) if target.role == Role::User => owner_matches(polygon, target.id),
            Some(_) => false,
            None => owner_matches(polygon, actor.id),
        },
        Role::User => owner_matches(polygon, actor.id),
    }
}

fn owner_matches(polygon: &Polygon, id: Option<i64>) -> bool {
    matches!((polygon.owner_id, id), (Some(owner), Some(actor)) if owner == actor)
}
