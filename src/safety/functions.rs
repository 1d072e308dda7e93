//! Deny-listed SQL functions.

/// Functions that must never appear in a generated query, matched lower-cased.
pub const DANGEROUS_FUNCTIONS: &[&str] = &[
    // Server filesystem access
    "pg_read_file",
    "pg_read_binary_file",
    "pg_stat_file",
    "pg_ls_dir",
    "pg_ls_logdir",
    "pg_ls_waldir",
    "pg_ls_tmpdir",
    "pg_ls_archive_statusdir",
    "pg_file_write",
    "pg_file_rename",
    "pg_file_unlink",
    "load_file",
    "readfile",
    "writefile",
    "load_extension",
    // Large objects
    "lo_import",
    "lo_export",
    "lo_get",
    "lo_put",
    "lo_create",
    "lo_creat",
    "lo_open",
    "lo_unlink",
    "lo_from_bytea",
    "loread",
    "lowrite",
    // Remote database bridging
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "dblink_connect_u",
    "dblink_open",
    "dblink_fetch",
    "dblink_send_query",
    "dblink_get_result",
    // Advisory locks
    "pg_advisory_lock",
    "pg_advisory_lock_shared",
    "pg_advisory_xact_lock",
    "pg_advisory_xact_lock_shared",
    "pg_try_advisory_lock",
    "pg_try_advisory_lock_shared",
    "pg_try_advisory_xact_lock",
    "pg_try_advisory_xact_lock_shared",
    // Backend control and denial of service
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "sleep",
    "benchmark",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_promote",
    "pg_switch_wal",
    "pg_create_restore_point",
    "pg_start_backup",
    "pg_stop_backup",
    "pg_backup_start",
    "pg_backup_stop",
    "set_config",
    // Introspection that leaks server configuration or runs nested SQL
    "current_setting",
    "pg_show_all_settings",
    "inet_server_addr",
    "inet_server_port",
    "inet_client_addr",
    "pg_postmaster_start_time",
    "pg_conf_load_time",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "query_to_xmlschema",
    "table_to_xml",
    "table_to_xml_and_xmlschema",
    "schema_to_xml",
    "database_to_xml",
    "database_to_xml_and_xmlschema",
    "cursor_to_xml",
];

/// Returns true if `name` (optionally schema-qualified) is deny-listed.
pub fn is_dangerous_function(name: &str) -> bool {
    let bare = name.rsplit('.').next().unwrap_or(name);
    let bare = bare.trim_matches('"').to_lowercase();
    DANGEROUS_FUNCTIONS.contains(&bare.as_str())
}
