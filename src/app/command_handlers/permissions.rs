use crate::app::command_support::{parse_id, CliContext};
use crate::permissions::{
    Capability, PermissionEngine, PermissionError, PermissionStore, ResourceRef, Shape,
    SqlitePermissionStore,
};

fn open_store(context: &CliContext) -> Result<SqlitePermissionStore, String> {
    SqlitePermissionStore::open(&context.settings.permissions_database()).map_err(|e| e.to_string())
}

/// `permit <user> <account> <capability> [uuid] [cookbook-uuid]`. Cookbook
/// capabilities register the cookbook on the account; app capabilities
/// register the app when its cookbook is named.
pub fn cmd_permit(context: &CliContext, args: &[String]) -> Result<String, String> {
    let (user, account, capability, uuid, cookbook) = match args {
        [user, account, cap] => (user, account, cap, None, None),
        [user, account, cap, uuid] => (user, account, cap, Some(uuid.as_str()), None),
        [user, account, cap, uuid, cookbook] => (
            user,
            account,
            cap,
            Some(uuid.as_str()),
            Some(cookbook.as_str()),
        ),
        _ => {
            return Err(
                "usage: lemc permit <user> <account> <capability> [uuid] [cookbook-uuid]"
                    .to_string(),
            )
        }
    };
    let user_id = parse_id(user, "user id")?;
    let account_id = parse_id(account, "account id")?;
    let capability = Capability::parse(capability).map_err(|e| e.to_string())?;
    let store = open_store(context)?;
    grant(&store, user_id, account_id, capability, uuid, cookbook).map_err(|e| e.to_string())?;

    let mut output = format!(
        "granted\nuser={user_id}\naccount={account_id}\ncapability={capability}\nshape={}",
        capability.shape()
    );
    if let Some(uuid) = uuid {
        output.push_str(&format!("\nresource={uuid}"));
    }
    Ok(output)
}

fn grant(
    store: &SqlitePermissionStore,
    user_id: i64,
    account_id: i64,
    capability: Capability,
    uuid: Option<&str>,
    cookbook: Option<&str>,
) -> Result<(), PermissionError> {
    let require_uuid = || {
        uuid.ok_or_else(|| {
            PermissionError::UnknownResource(format!(
                "{capability} needs a {} uuid",
                capability.shape()
            ))
        })
    };
    match capability.shape() {
        Shape::System => {
            let mut record = store.system(user_id)?.unwrap_or_default();
            record.grant(capability);
            store.grant_system(user_id, &record)
        }
        Shape::Account => {
            let mut record = store.account(user_id, account_id)?.unwrap_or_default();
            record.grant(capability);
            store.grant_account(user_id, account_id, &record)
        }
        Shape::Cookbook => {
            let uuid = require_uuid()?;
            store.register_cookbook(uuid, account_id)?;
            let mut record = store
                .cookbook(user_id, account_id, uuid)?
                .unwrap_or_default();
            record.grant(capability);
            store.grant_cookbook(user_id, account_id, uuid, &record)
        }
        Shape::App => {
            let uuid = require_uuid()?;
            if let Some(cookbook) = cookbook {
                store.register_cookbook(cookbook, account_id)?;
                store.register_app(uuid, account_id, cookbook)?;
            }
            let mut record = store.app(user_id, account_id, uuid)?.unwrap_or_default();
            record.grant(capability);
            store.grant_app(user_id, account_id, uuid, &record)
        }
    }
}

/// `check <user> <account> <cap[,cap...]> [uuid]`. A lookup failure is
/// reported as a denial with the failure attached.
pub fn cmd_check(context: &CliContext, args: &[String]) -> Result<String, String> {
    let (user, account, caps, uuid) = match args {
        [user, account, caps] => (user, account, caps, None),
        [user, account, caps, uuid] => (user, account, caps, Some(uuid.as_str())),
        _ => return Err("usage: lemc check <user> <account> <cap[,cap...]> [uuid]".to_string()),
    };
    let user_id = parse_id(user, "user id")?;
    let account_id = parse_id(account, "account id")?;
    let capabilities = caps
        .split(',')
        .filter(|raw| !raw.trim().is_empty())
        .map(Capability::parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    if capabilities.is_empty() {
        return Err("at least one capability is required".to_string());
    }

    let engine = PermissionEngine::new(open_store(context)?);
    let resource = ResourceRef {
        account_id: Some(account_id),
        cookbook_uuid: uuid,
        app_uuid: uuid,
    };
    match engine.has_any(user_id, resource, &capabilities) {
        Ok(granted) => Ok(format!("granted={granted}")),
        Err(err) => Ok(format!("granted=false\nlookup_error={err}")),
    }
}
