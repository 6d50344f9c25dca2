//! SQL query constants
//!
//! Catalog queries used by the PostgreSQL adapter. Every query is scoped to
//! an explicit schema passed as `$1`.

/// Base tables in a schema
pub const LIST_TABLES: &str = r#"
    SELECT table_name::text AS name
    FROM information_schema.tables
    WHERE table_schema = $1
        AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

/// Column information for a table, including key flags and FK target
pub const GET_COLUMNS: &str = r#"
    SELECT
        a.attname::text AS name,
        format_type(a.atttypid, a.atttypmod) AS data_type,
        NOT a.attnotnull AS nullable,
        COALESCE(pg_get_expr(d.adbin, d.adrelid), '') AS column_default,
        EXISTS (
            SELECT 1 FROM pg_constraint pk
            WHERE pk.conrelid = c.oid
                AND pk.contype = 'p'
                AND a.attnum = ANY(pk.conkey)
        ) AS is_primary,
        EXISTS (
            SELECT 1 FROM pg_constraint uq
            WHERE uq.conrelid = c.oid
                AND uq.contype = 'u'
                AND array_length(uq.conkey, 1) = 1
                AND a.attnum = ANY(uq.conkey)
        ) AS is_unique,
        (a.attidentity <> '' OR COALESCE(pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%') AS is_auto_increment,
        COALESCE(fk.ref_table, '') AS foreign_key_table,
        COALESCE(fk.ref_column, '') AS foreign_key_column,
        COALESCE(fk.on_delete, '') AS on_delete_action
    FROM pg_attribute a
    JOIN pg_class c ON c.oid = a.attrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    LEFT JOIN LATERAL (
        SELECT
            rc.relname::text AS ref_table,
            ra.attname::text AS ref_column,
            CASE con.confdeltype
                WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL'
                WHEN 'd' THEN 'SET DEFAULT'
                WHEN 'r' THEN 'RESTRICT'
                ELSE 'NO ACTION'
            END AS on_delete
        FROM pg_constraint con
        JOIN pg_class rc ON rc.oid = con.confrelid
        JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = con.confkey[1]
        WHERE con.conrelid = c.oid
            AND con.contype = 'f'
            AND con.conkey[1] = a.attnum
        LIMIT 1
    ) fk ON true
    WHERE n.nspname = $1
        AND c.relname = $2
        AND a.attnum > 0
        AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

/// Enum types and their ordered labels
pub const LIST_ENUMS: &str = r#"
    SELECT
        t.typname::text AS name,
        array_agg(e.enumlabel::text ORDER BY e.enumsortorder) AS labels
    FROM pg_type t
    JOIN pg_enum e ON e.enumtypid = t.oid
    JOIN pg_namespace n ON n.oid = t.typnamespace
    WHERE n.nspname = $1
    GROUP BY t.typname
    ORDER BY t.typname
"#;

/// Connection liveness check
pub const PING: &str = "SELECT 1 AS ok";
