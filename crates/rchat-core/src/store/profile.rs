//! `Profile` repository: the single mutable `UserProfile` row.

use rusqlite::{params, OptionalExtension};

use crate::error::CoreResult;

use super::types::UserProfile;
use super::Store;

impl Store {
    pub fn get_user_profile(&self) -> CoreResult<UserProfile> {
        let conn = self.conn.lock();
        let profile = conn
            .query_row(
                "SELECT alias, avatar_ref FROM profile WHERE id = 0",
                [],
                |r| {
                    Ok(UserProfile {
                        alias: r.get(0)?,
                        avatar_ref: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(profile.unwrap_or_default())
    }

    pub fn update_user_profile(&self, alias: Option<&str>, avatar_ref: Option<&str>) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO profile (id, alias, avatar_ref) VALUES (0, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
               alias = COALESCE(?1, profile.alias),
               avatar_ref = COALESCE(?2, profile.avatar_ref)",
            params![alias, avatar_ref],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_preserves_unset_fields() {
        let store = Store::open_in_memory().unwrap();
        store.update_user_profile(Some("bob"), None).unwrap();
        store.update_user_profile(None, Some("avatar://1")).unwrap();
        let profile = store.get_user_profile().unwrap();
        assert_eq!(profile.alias.as_deref(), Some("bob"));
        assert_eq!(profile.avatar_ref.as_deref(), Some("avatar://1"));
    }
}
