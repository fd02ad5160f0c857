use tracing::{info, warn};
use uuid::Uuid;

use parley_db::models::GroupRow;
use parley_db::{format_timestamp, is_unique_violation};
use parley_types::api::DeletedGroup;
use parley_types::{Group, Membership, Visibility};

use crate::engine::{Engine, now};
use crate::error::{EngineError, EngineResult};
use crate::validation;

impl Engine {
    /// Create a group owned by `owner`. Private groups start with the owner as
    /// their only member.
    pub fn create_group(
        &self,
        name: &str,
        visibility: Visibility,
        owner: Uuid,
    ) -> EngineResult<Group> {
        let name = validation::group_name(name)?;
        self.ensure_name_free(&name, visibility, None)?;

        let group = Group {
            id: Uuid::new_v4(),
            name,
            owner_user_id: owner,
            visibility,
            created_at: now(),
        };
        let owner_joined_at =
            (visibility == Visibility::Private).then(|| format_timestamp(&group.created_at));

        self.db
            .create_group(&GroupRow::from(&group), owner_joined_at.as_deref())
            .map_err(|e| self.name_conflict_or(e, &group.name, visibility))?;

        info!(
            "{} created {} group '{}' ({})",
            owner, visibility, group.name, group.id
        );
        Ok(group)
    }

    pub fn get_group(&self, group_id: Uuid) -> EngineResult<Group> {
        self.load_group(group_id)
    }

    pub fn rename_group(&self, group_id: Uuid, new_name: &str, caller: Uuid) -> EngineResult<Group> {
        let mut group = self.load_group(group_id)?;
        if !group.is_owned_by(caller) {
            return Err(EngineError::forbidden("Only the group owner may rename it"));
        }
        let new_name = validation::group_name(new_name)?;
        if new_name == group.name {
            return Err(EngineError::no_modification("Group already has that name"));
        }
        self.ensure_name_free(&new_name, group.visibility, Some(group.id))?;

        let renamed = self
            .db
            .rename_group(&group_id.to_string(), &new_name)
            .map_err(|e| self.name_conflict_or(e, &new_name, group.visibility))?;
        if !renamed {
            return Err(EngineError::group_not_found(group_id));
        }

        info!(
            "{} renamed group {} from '{}' to '{}'",
            caller, group_id, group.name, new_name
        );
        group.name = new_name;
        Ok(group)
    }

    /// Delete a group with all of its messages and memberships. The cascade is
    /// all-or-nothing.
    pub fn delete_group(&self, group_id: Uuid, caller: Uuid) -> EngineResult<DeletedGroup> {
        let group = self.load_group(group_id)?;
        if !group.is_owned_by(caller) {
            return Err(EngineError::forbidden("Only the group owner may delete it"));
        }

        let cascade = self
            .db
            .delete_group_cascade(&group_id.to_string())
            .map_err(|e| {
                warn!("Cascade delete of group {} failed: {:#}", group_id, e);
                EngineError::cascade_failed(&e)
            })?;

        info!(
            "{} deleted group '{}' ({}): {} messages, {} memberships",
            caller, group.name, group_id, cascade.messages, cascade.memberships
        );
        Ok(DeletedGroup {
            group_id,
            messages_deleted: cascade.messages,
            memberships_deleted: cascade.memberships,
        })
    }

    pub fn list_public_groups(&self) -> EngineResult<Vec<Group>> {
        let rows = self.db.list_groups_by_visibility(Visibility::Public.as_str())?;
        Ok(rows
            .into_iter()
            .map(Group::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    /// Private groups `user_id` belongs to.
    pub fn list_private_groups(&self, user_id: Uuid) -> EngineResult<Vec<Group>> {
        let rows = self.db.list_groups_for_member(&user_id.to_string())?;
        Ok(rows
            .into_iter()
            .map(Group::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    /// Add `user_id` to a private group. Only the owner may add members.
    pub fn add_member(&self, group_id: Uuid, user_id: Uuid, caller: Uuid) -> EngineResult<Membership> {
        let group = self.private_group(group_id)?;
        if !group.is_owned_by(caller) {
            return Err(EngineError::forbidden("Only the group owner may add members"));
        }
        if self.is_member(group_id, user_id)? {
            return Err(EngineError::AlreadyMember { group_id, user_id });
        }

        let membership = Membership {
            group_id,
            user_id,
            joined_at: now(),
        };
        self.db
            .insert_membership(
                &group_id.to_string(),
                &user_id.to_string(),
                &format_timestamp(&membership.joined_at),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EngineError::AlreadyMember { group_id, user_id }
                } else {
                    EngineError::from(e)
                }
            })?;

        info!("{} added {} to group {}", caller, user_id, group_id);
        Ok(membership)
    }

    /// Remove a member. The owner may remove anyone but themselves; a member may
    /// remove themselves.
    pub fn remove_member(&self, group_id: Uuid, user_id: Uuid, caller: Uuid) -> EngineResult<()> {
        let group = self.private_group(group_id)?;
        if caller != user_id && !group.is_owned_by(caller) {
            return Err(EngineError::forbidden(
                "Only the group owner may remove other members",
            ));
        }
        if group.is_owned_by(user_id) {
            return Err(EngineError::validation(
                "The owner cannot leave their own group; delete it instead",
            ));
        }

        let removed = self
            .db
            .delete_membership(&group_id.to_string(), &user_id.to_string())?;
        if !removed {
            return Err(EngineError::membership_not_found(group_id));
        }

        info!("{} removed {} from group {}", caller, user_id, group_id);
        Ok(())
    }

    /// Members of a private group in join order. Only members may list them.
    pub fn list_members(&self, group_id: Uuid, caller: Uuid) -> EngineResult<Vec<Membership>> {
        let group = self.private_group(group_id)?;
        self.ensure_can_view(&group, caller)?;

        let rows = self.db.list_members(&group_id.to_string())?;
        Ok(rows
            .into_iter()
            .map(Membership::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    fn private_group(&self, group_id: Uuid) -> EngineResult<Group> {
        let group = self.load_group(group_id)?;
        if group.visibility != Visibility::Private {
            return Err(EngineError::validation(
                "Public groups have no member list",
            ));
        }
        Ok(group)
    }

    fn ensure_name_free(
        &self,
        name: &str,
        visibility: Visibility,
        except: Option<Uuid>,
    ) -> EngineResult<()> {
        if let Some(existing) = self.db.find_group_by_name(name, visibility.as_str())? {
            if except.map(|id| id.to_string()) != Some(existing.id) {
                return Err(EngineError::NameTaken {
                    name: name.to_string(),
                    visibility,
                });
            }
        }
        Ok(())
    }

    /// A concurrent writer can win between the name check and the write; the
    /// UNIQUE index reports it.
    fn name_conflict_or(&self, err: anyhow::Error, name: &str, visibility: Visibility) -> EngineError {
        if is_unique_violation(&err) {
            EngineError::NameTaken {
                name: name.to_string(),
                visibility,
            }
        } else {
            EngineError::from(err)
        }
    }
}
