use std::time::{Duration, Instant};

use herald_channels::{
    create_channel, delete_channel, ChannelInfo, ChannelLookup, LookupError, SqliteChannelLookup,
};
use herald_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings, Deadline};
use herald_origins::OriginRegistry;
use herald_rules::validation::{FIELD_CHANNEL, FIELD_ORIGINS};
use herald_rules::{RuleEngine, RuleError};
use herald_types::{Action, ChannelReference, ChannelType, Origin, OriginReference, Rule, Trigger};
use tempfile::NamedTempFile;

struct Fixture {
    _file: NamedTempFile,
    pool: DbPool,
    origins: OriginRegistry,
    engine: RuleEngine<SqliteChannelLookup>,
}

fn setup_with_limit(limit: usize) -> Fixture {
    let file = NamedTempFile::new().expect("failed to create temp file");
    let pool = create_pool(
        file.path().to_str().expect("temp path should be utf-8"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");

    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).expect("failed to run migrations");
        create_channel(&conn, "mail", "Ops mail", ChannelType::Mail).unwrap();
        create_channel(&conn, "mm", "Ops chat", ChannelType::Mattermost).unwrap();
    }

    let origins = OriginRegistry::new(pool.clone());
    origins
        .upsert_origins(
            "monitor",
            &[Origin::new("Disk", "infra.disk"), Origin::new("CPU", "infra.cpu")],
            Deadline::none(),
        )
        .unwrap();

    let engine = RuleEngine::new(pool.clone(), SqliteChannelLookup::new(pool.clone()), limit);
    Fixture {
        _file: file,
        pool,
        origins,
        engine,
    }
}

fn setup() -> Fixture {
    setup_with_limit(herald_rules::DEFAULT_RULE_LIMIT)
}

fn mail_rule(name: &str) -> Rule {
    Rule {
        name: name.to_string(),
        trigger: Trigger {
            origins: vec![OriginReference::class("infra.disk")],
            levels: vec!["error".to_string()],
        },
        action: Action {
            channel: ChannelReference::id("mail"),
            recipient: "ops@example.com".to_string(),
        },
        active: true,
        ..Rule::default()
    }
}

fn soon() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

#[test]
fn get_returns_what_create_returned() {
    let f = setup();

    let created = f.engine.create(mail_rule("disk"), soon()).unwrap();
    assert!(created.active);
    assert!(created.errors.is_empty());
    assert_eq!(created.action.channel.channel_type, Some(ChannelType::Mail));

    let id = created.id.clone().unwrap();
    assert_eq!(f.engine.get(&id, soon()).unwrap(), created);
    assert_eq!(f.engine.list(soon()).unwrap(), vec![created]);
}

#[test]
fn create_ignores_client_supplied_resolved_fields() {
    let f = setup();
    let mut rule = mail_rule("disk");
    rule.id = Some("5f0c7c2e-8d8f-4b43-9a55-0c1f3f2b7a10".to_string());
    rule.trigger.origins = vec![OriginReference {
        name: "made up".to_string(),
        class: "infra.disk".to_string(),
        service_id: "spoofed".to_string(),
    }];
    rule.action.channel.name = "made up".to_string();

    let created = f.engine.create(rule, soon()).unwrap();

    assert_ne!(created.id.as_deref(), Some("5f0c7c2e-8d8f-4b43-9a55-0c1f3f2b7a10"));
    assert_eq!(created.trigger.origins[0].name, "Disk");
    assert_eq!(created.trigger.origins[0].service_id, "monitor");
    assert_eq!(created.action.channel.name, "Ops mail");
}

#[test]
fn delete_is_idempotent() {
    let f = setup();
    let id = f.engine.create(mail_rule("disk"), soon()).unwrap().id.unwrap();

    f.engine.delete(&id, soon()).unwrap();
    f.engine.delete(&id, soon()).unwrap();
    f.engine
        .delete("5f0c7c2e-8d8f-4b43-9a55-0c1f3f2b7a10", soon())
        .unwrap();

    assert!(matches!(
        f.engine.get(&id, soon()),
        Err(RuleError::ItemNotFound(_))
    ));
}

#[test]
fn emptied_origins_deactivate_rule_on_read() {
    let f = setup();
    let id = f.engine.create(mail_rule("disk"), soon()).unwrap().id.unwrap();

    f.origins.upsert_origins("monitor", &[], soon()).unwrap();

    let read = f.engine.get(&id, soon()).unwrap();
    assert!(!read.active);
    assert!(read.trigger.origins.is_empty());
    assert!(read.errors.get(FIELD_ORIGINS).is_some());

    // Storage still holds the author's intent.
    let conn = f.pool.get().unwrap();
    let (classes, active): (String, bool) = conn
        .query_row(
            "SELECT trigger_origins, active FROM rules WHERE id = ?1",
            [&id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(classes, r#"["infra.disk"]"#);
    assert!(active);
    drop(conn);

    // Re-registering the origin brings the rule back.
    f.origins
        .upsert_origins("monitor", &[Origin::new("Disk", "infra.disk")], soon())
        .unwrap();
    let read = f.engine.get(&id, soon()).unwrap();
    assert!(read.active);
    assert!(read.errors.is_empty());
}

#[test]
fn deleted_channel_deactivates_rule_on_list() {
    let f = setup();
    f.engine.create(mail_rule("disk"), soon()).unwrap();
    let mut chat = mail_rule("chat");
    chat.action = Action {
        channel: ChannelReference::id("mm"),
        recipient: String::new(),
    };
    f.engine.create(chat, soon()).unwrap();

    delete_channel(&f.pool.get().unwrap(), "mail").unwrap();

    let rules = f.engine.list(soon()).unwrap();
    assert_eq!(rules.len(), 2);
    let (chat, disk) = (&rules[0], &rules[1]);
    assert_eq!(chat.name, "chat");
    assert!(chat.active);
    assert_eq!(disk.name, "disk");
    assert!(!disk.active);
    assert_eq!(disk.errors.len(), 1);
    assert!(disk.errors.get(FIELD_CHANNEL).is_some());
}

#[test]
fn recipient_policy_follows_channel_type() {
    let f = setup();

    let mut no_recipient = mail_rule("a");
    no_recipient.action.recipient = "  ".to_string();
    assert!(matches!(
        f.engine.create(no_recipient, soon()),
        Err(RuleError::RecipientRequired)
    ));

    let mut chat_with_recipient = mail_rule("b");
    chat_with_recipient.action.channel = ChannelReference::id("mm");
    assert!(matches!(
        f.engine.create(chat_with_recipient, soon()),
        Err(RuleError::RecipientNotSupported(ChannelType::Mattermost))
    ));

    assert!(f.engine.create(mail_rule("c"), soon()).is_ok());

    let mut chat = mail_rule("d");
    chat.action = Action {
        channel: ChannelReference::id("mm"),
        recipient: String::new(),
    };
    assert!(f.engine.create(chat, soon()).is_ok());
}

#[test]
fn rule_limit_is_enforced_before_validation() {
    let f = setup_with_limit(1);
    assert_eq!(f.engine.limit(), 1);
    f.engine.create(mail_rule("first"), soon()).unwrap();

    let err = f.engine.create(Rule::default(), soon()).unwrap_err();
    assert!(matches!(err, RuleError::RuleLimitReached { limit: 1 }));

    // Updates are not subject to the ceiling.
    let id = f.engine.list(soon()).unwrap()[0].id.clone().unwrap();
    assert!(f.engine.update(&id, mail_rule("renamed"), soon()).is_ok());
}

#[test]
fn duplicate_names_are_rejected() {
    let f = setup();
    f.engine.create(mail_rule("disk"), soon()).unwrap();
    let other = f.engine.create(mail_rule("other"), soon()).unwrap();

    assert!(matches!(
        f.engine.create(mail_rule(" disk "), soon()),
        Err(RuleError::DuplicateRuleName(name)) if name == "disk"
    ));
    assert!(matches!(
        f.engine
            .update(other.id.as_deref().unwrap(), mail_rule("disk"), soon()),
        Err(RuleError::DuplicateRuleName(_))
    ));
}

#[test]
fn write_reference_errors() {
    let f = setup();

    let mut unknown_origin = mail_rule("a");
    unknown_origin.trigger.origins.push(OriginReference::class("nope"));
    assert!(matches!(
        f.engine.create(unknown_origin, soon()),
        Err(RuleError::OriginsNotFound(missing)) if missing == vec!["nope".to_string()]
    ));

    let mut unknown_channel = mail_rule("b");
    unknown_channel.action.channel = ChannelReference::id("gone");
    assert!(matches!(
        f.engine.create(unknown_channel, soon()),
        Err(RuleError::ChannelNotFound(id)) if id == "gone"
    ));

    let err = f.engine.create(Rule::default(), soon()).unwrap_err();
    match err {
        RuleError::Invalid(errors) => assert_eq!(errors.len(), 4),
        other => panic!("expected Invalid, got {other:?}"),
    }

    assert!(f.engine.list(soon()).unwrap().is_empty());
}

#[test]
fn update_id_errors() {
    let f = setup();

    assert!(matches!(
        f.engine.update("12", mail_rule("a"), soon()),
        Err(RuleError::InvalidId(_))
    ));
    assert!(matches!(
        f.engine.get("12", soon()),
        Err(RuleError::InvalidId(_))
    ));
    assert!(matches!(
        f.engine
            .update("5f0c7c2e-8d8f-4b43-9a55-0c1f3f2b7a10", mail_rule("a"), soon()),
        Err(RuleError::ItemNotFound(_))
    ));
}

#[test]
fn expired_deadline_times_out() {
    let f = setup();
    let expired = Deadline::at(Instant::now() - Duration::from_millis(1));

    assert!(matches!(
        f.engine.create(mail_rule("a"), expired),
        Err(RuleError::Timeout)
    ));
    assert!(matches!(f.engine.list(expired), Err(RuleError::Timeout)));
}

#[test]
fn exhausted_pool_times_out_at_the_deadline() {
    let f = setup();
    let settings = DbRuntimeSettings {
        pool_max_size: 1,
        ..DbRuntimeSettings::default()
    };
    let small = create_pool(f._file.path().to_str().unwrap(), settings).unwrap();
    let engine = RuleEngine::new(small.clone(), SqliteChannelLookup::new(small.clone()), 10);
    let _only_connection = small.get().unwrap();

    let started = Instant::now();
    let err = engine
        .list(Deadline::after(Duration::from_millis(100)))
        .unwrap_err();
    assert!(matches!(err, RuleError::Timeout), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(2), "waited {:?}", started.elapsed());
}

#[test]
fn padded_origin_class_is_referenceable() {
    let f = setup();
    f.origins
        .upsert_origins("padded", &[Origin::new("Memory", " infra.mem ")], Deadline::none())
        .unwrap();

    let mut rule = mail_rule("memory");
    rule.trigger.origins = vec![OriginReference::class(" infra.mem ")];
    let created = f.engine.create(rule, soon()).unwrap();

    assert_eq!(created.trigger.origins[0].class, "infra.mem");
    assert_eq!(created.trigger.origins[0].service_id, "padded");
}

struct BrokenLookup;

impl ChannelLookup for BrokenLookup {
    fn get_by_id(&self, _id: &str, _deadline: Deadline) -> Result<ChannelInfo, LookupError> {
        Err(LookupError::Unavailable("registry offline".to_string()))
    }
}

#[test]
fn lookup_failure_is_not_a_missing_channel() {
    let f = setup();
    let engine = RuleEngine::new(f.pool.clone(), BrokenLookup, 10);

    let err = engine.create(mail_rule("a"), soon()).unwrap_err();
    assert!(matches!(err, RuleError::ChannelLookup(reason) if reason == "registry offline"));
}
