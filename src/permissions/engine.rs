use super::{
    AccountGrant, AppGrant, Capability, CookbookGrant, PermissionError, PermissionStore, Shape,
    SystemGrant,
};

/// Identifiers of the resource being accessed. Which of them is consulted
/// depends on the capability's shape; a missing identifier reads as "no
/// record".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceRef<'a> {
    pub account_id: Option<i64>,
    pub cookbook_uuid: Option<&'a str>,
    pub app_uuid: Option<&'a str>,
}

impl<'a> ResourceRef<'a> {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn account(account_id: i64) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn cookbook(account_id: i64, cookbook_uuid: &'a str) -> Self {
        Self {
            account_id: Some(account_id),
            cookbook_uuid: Some(cookbook_uuid),
            app_uuid: None,
        }
    }

    pub fn app(account_id: i64, app_uuid: &'a str) -> Self {
        Self {
            account_id: Some(account_id),
            cookbook_uuid: None,
            app_uuid: Some(app_uuid),
        }
    }
}

/// Records fetched during one `has_any` call, so several capabilities of the
/// same shape cost one lookup.
#[derive(Default)]
struct Fetched {
    system: Option<Option<SystemGrant>>,
    account: Option<Option<AccountGrant>>,
    cookbook: Option<Option<CookbookGrant>>,
    app: Option<Option<AppGrant>>,
}

pub struct PermissionEngine<S: PermissionStore> {
    store: S,
}

impl<S: PermissionStore> PermissionEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// True as soon as any capability is granted. A lookup failure only
    /// surfaces when nothing else granted access; callers treat it as deny.
    pub fn has_any(
        &self,
        user_id: i64,
        resource: ResourceRef<'_>,
        capabilities: &[Capability],
    ) -> Result<bool, PermissionError> {
        let mut fetched = Fetched::default();
        let mut first_failure: Option<PermissionError> = None;

        for &capability in capabilities {
            match self.check(&mut fetched, user_id, resource, capability) {
                Ok(true) => {
                    tracing::debug!(user_id, capability = %capability, "permission granted");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        user_id,
                        capability = %capability,
                        "permission lookup failed: {err}"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(PermissionError::LookupFailed {
                            capability,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    pub fn system(&self, user_id: i64, capability: Capability) -> Result<bool, PermissionError> {
        require_shape(capability, Shape::System)?;
        self.has_any(user_id, ResourceRef::system(), &[capability])
    }

    pub fn account(
        &self,
        user_id: i64,
        account_id: i64,
        capability: Capability,
    ) -> Result<bool, PermissionError> {
        require_shape(capability, Shape::Account)?;
        self.has_any(user_id, ResourceRef::account(account_id), &[capability])
    }

    pub fn cookbook(
        &self,
        user_id: i64,
        account_id: i64,
        cookbook_uuid: &str,
        capability: Capability,
    ) -> Result<bool, PermissionError> {
        require_shape(capability, Shape::Cookbook)?;
        self.has_any(
            user_id,
            ResourceRef::cookbook(account_id, cookbook_uuid),
            &[capability],
        )
    }

    pub fn app(
        &self,
        user_id: i64,
        account_id: i64,
        app_uuid: &str,
        capability: Capability,
    ) -> Result<bool, PermissionError> {
        require_shape(capability, Shape::App)?;
        self.has_any(
            user_id,
            ResourceRef::app(account_id, app_uuid),
            &[capability],
        )
    }

    fn check(
        &self,
        fetched: &mut Fetched,
        user_id: i64,
        resource: ResourceRef<'_>,
        capability: Capability,
    ) -> Result<bool, PermissionError> {
        let granted = match capability.shape() {
            Shape::System => {
                if fetched.system.is_none() {
                    fetched.system = Some(self.store.system(user_id)?);
                }
                fetched
                    .system
                    .flatten()
                    .is_some_and(|grant| grant.allows(capability))
            }
            Shape::Account => {
                let Some(account_id) = resource.account_id else {
                    return Ok(false);
                };
                if fetched.account.is_none() {
                    fetched.account = Some(self.store.account(user_id, account_id)?);
                }
                fetched
                    .account
                    .flatten()
                    .is_some_and(|grant| grant.allows(capability))
            }
            Shape::Cookbook => {
                let (Some(account_id), Some(uuid)) = (resource.account_id, resource.cookbook_uuid)
                else {
                    return Ok(false);
                };
                if fetched.cookbook.is_none() {
                    fetched.cookbook = Some(self.store.cookbook(user_id, account_id, uuid)?);
                }
                fetched
                    .cookbook
                    .flatten()
                    .is_some_and(|grant| grant.allows(capability))
            }
            Shape::App => {
                let (Some(account_id), Some(uuid)) = (resource.account_id, resource.app_uuid)
                else {
                    return Ok(false);
                };
                if fetched.app.is_none() {
                    fetched.app = Some(self.store.app(user_id, account_id, uuid)?);
                }
                fetched
                    .app
                    .flatten()
                    .is_some_and(|grant| grant.allows(capability))
            }
        };
        Ok(granted)
    }
}

fn require_shape(capability: Capability, requested: Shape) -> Result<(), PermissionError> {
    if capability.shape() == requested {
        Ok(())
    } else {
        Err(PermissionError::WrongShape {
            capability,
            requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStore {
        system: HashMap<i64, SystemGrant>,
        accounts: HashMap<(i64, i64), AccountGrant>,
        apps: HashMap<(i64, i64, String), AppGrant>,
        fail_accounts: bool,
        account_lookups: AtomicUsize,
    }

    impl PermissionStore for FakeStore {
        fn system(&self, user_id: i64) -> Result<Option<SystemGrant>, PermissionError> {
            Ok(self.system.get(&user_id).copied())
        }

        fn account(
            &self,
            user_id: i64,
            account_id: i64,
        ) -> Result<Option<AccountGrant>, PermissionError> {
            self.account_lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_accounts {
                return Err(PermissionError::UnknownResource("db offline".to_string()));
            }
            Ok(self.accounts.get(&(user_id, account_id)).copied())
        }

        fn cookbook(
            &self,
            _user_id: i64,
            _account_id: i64,
            _cookbook_uuid: &str,
        ) -> Result<Option<CookbookGrant>, PermissionError> {
            Ok(None)
        }

        fn app(
            &self,
            user_id: i64,
            account_id: i64,
            app_uuid: &str,
        ) -> Result<Option<AppGrant>, PermissionError> {
            Ok(self
                .apps
                .get(&(user_id, account_id, app_uuid.to_string()))
                .copied())
        }
    }

    #[test]
    fn no_record_is_false_not_an_error() {
        let engine = PermissionEngine::new(FakeStore::default());
        let granted = engine
            .has_any(7, ResourceRef::account(1), &[Capability::ViewApps])
            .expect("lookup");
        assert!(!granted);
    }

    #[test]
    fn any_granted_capability_short_circuits() {
        let mut store = FakeStore::default();
        store.apps.insert(
            (7, 1, "app-1".to_string()),
            AppGrant {
                can_individual: true,
                ..AppGrant::default()
            },
        );
        let engine = PermissionEngine::new(store);
        let resource = ResourceRef::app(1, "app-1");
        assert!(engine
            .has_any(
                7,
                resource,
                &[Capability::SharedApp, Capability::IndividualApp]
            )
            .expect("lookup"));
        assert!(!engine
            .has_any(7, resource, &[Capability::SharedApp, Capability::AclApp])
            .expect("lookup"));
    }

    #[test]
    fn same_shape_capabilities_share_one_lookup() {
        let engine = PermissionEngine::new(FakeStore::default());
        let granted = engine
            .has_any(
                7,
                ResourceRef::account(1),
                &[
                    Capability::ViewApps,
                    Capability::ViewCookbooks,
                    Capability::CreateApp,
                ],
            )
            .expect("lookup");
        assert!(!granted);
        assert_eq!(engine.store().account_lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lookup_failure_is_reported_unless_another_capability_grants() {
        let mut store = FakeStore {
            fail_accounts: true,
            ..FakeStore::default()
        };
        let resource = ResourceRef::account(1);

        let engine = PermissionEngine::new(store);
        let err = engine
            .has_any(7, resource, &[Capability::ViewApps])
            .expect_err("lookup should fail");
        assert!(matches!(
            err,
            PermissionError::LookupFailed {
                capability: Capability::ViewApps,
                ..
            }
        ));

        store = FakeStore {
            fail_accounts: true,
            ..FakeStore::default()
        };
        store.system.insert(
            7,
            SystemGrant {
                can_administer: true,
                is_owner: false,
            },
        );
        let engine = PermissionEngine::new(store);
        assert!(engine
            .has_any(
                7,
                resource,
                &[Capability::ViewApps, Capability::AdministerSystem]
            )
            .expect("system grant wins"));
    }

    #[test]
    fn entry_points_reject_capabilities_of_another_shape() {
        let engine = PermissionEngine::new(FakeStore::default());
        let err = engine
            .account(7, 1, Capability::AdministerSystem)
            .expect_err("wrong shape");
        assert!(matches!(
            err,
            PermissionError::WrongShape {
                requested: Shape::Account,
                ..
            }
        ));
        assert!(!engine
            .cookbook(7, 1, "cb", Capability::EditCookbook)
            .expect("lookup"));
    }

    #[test]
    fn missing_resource_identifier_reads_as_no_record() {
        let engine = PermissionEngine::new(FakeStore::default());
        assert!(!engine
            .has_any(7, ResourceRef::system(), &[Capability::SharedApp])
            .expect("lookup"));
    }
}
