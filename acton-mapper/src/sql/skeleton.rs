//! Fixed SQL skeletons filled by the synthesizer
//!
//! Tokens that are filled per call (`#WHERE`, `#ORDERBY`, `#LIMIT`, `#OFFSET`)
//! each sit on their own line so that removing them leaves no stray text.
//!
//! Data-modifying CTEs are ordered with a `(SELECT COUNT(1) FROM ...) >= 0`
//! guard: the guard forces the DELETE to run before the INSERT reads its rows,
//! so a single statement performs delete-then-insert.
//!
//! Bulk inserts feed their rows in `batch_ordinal` order, so the generated
//! keys rise in input order and `array_agg(... ORDER BY key)` returns them
//! aligned with the batch.

pub(crate) const SELECT: &str = "\
SELECT #COLUMNS
FROM #TABLE_NAME AS #TABLE_ALIAS
#JOIN
#WHERE
#ORDERBY
#LIMIT
#OFFSET";

pub(crate) const SELECT_DISTINCT: &str = "\
SELECT DISTINCT #COLUMNS
FROM #TABLE_NAME AS #TABLE_ALIAS
#JOIN
#WHERE
#ORDERBY
#LIMIT
#OFFSET";

pub(crate) const INSERT: &str = "\
INSERT INTO #TABLE_NAME (#COLUMNS)
VALUES (#PARAMETER_NAMES)
RETURNING #PRIMARY_KEY";

pub(crate) const INSERT_WITH_CONFLICT_CHECK: &str = "\
WITH removed AS (
    DELETE FROM #TABLE_NAME AS #TABLE_ALIAS
    WHERE #UNIQUE_KEY_FILTERS
    RETURNING #UNIQUE_KEYS
)
INSERT INTO #TABLE_NAME (#COLUMNS)
SELECT #PARAMETER_NAMES
WHERE (SELECT COUNT(1) FROM removed) >= 0
RETURNING #PRIMARY_KEY";

pub(crate) const BULK_INSERT: &str = "\
WITH inserted AS (
    INSERT INTO #TABLE_NAME (#COLUMNS)
    SELECT #COLUMNS FROM (VALUES
        #VALUES
    ) AS batch (#COLUMNS, batch_ordinal)
    ORDER BY batch_ordinal
    RETURNING #PRIMARY_KEY
)
SELECT array_agg(#PRIMARY_KEY ORDER BY #PRIMARY_KEY) FROM inserted";

pub(crate) const BULK_INSERT_WITH_CONFLICT_CHECK: &str = "\
WITH removed AS (
    DELETE FROM #TABLE_NAME AS #TABLE_ALIAS
    WHERE #UNIQUE_KEY_FILTERS
    RETURNING #UNIQUE_KEYS
), inserted AS (
    INSERT INTO #TABLE_NAME (#COLUMNS)
    SELECT #COLUMNS FROM (VALUES
        #VALUES
    ) AS batch (#COLUMNS, batch_ordinal)
    WHERE (SELECT COUNT(1) FROM removed) >= 0
    ORDER BY batch_ordinal
    RETURNING #PRIMARY_KEY
)
SELECT array_agg(#PRIMARY_KEY ORDER BY #PRIMARY_KEY) FROM inserted";

pub(crate) const UPSERT: &str = "\
WITH purged AS (
    DELETE FROM #TABLE_NAME AS #TABLE_ALIAS
    #WHERE
    RETURNING 1
), inserted AS (
    INSERT INTO #TABLE_NAME (#COLUMNS)
    SELECT #COLUMNS FROM (VALUES
        #VALUES
    ) AS batch (#COLUMNS, batch_ordinal)
    WHERE (SELECT COUNT(1) FROM purged) >= 0
    ORDER BY batch_ordinal
    RETURNING #PRIMARY_KEY
)
SELECT array_agg(#PRIMARY_KEY ORDER BY #PRIMARY_KEY) FROM inserted";

pub(crate) const UPSERT_WITH_CONFLICT_CHECK: &str = "\
WITH purged AS (
    DELETE FROM #TABLE_NAME AS #TABLE_ALIAS
    #WHERE
    RETURNING 1
), removed AS (
    DELETE FROM #TABLE_NAME AS #TABLE_ALIAS
    WHERE #UNIQUE_KEY_FILTERS
    RETURNING #UNIQUE_KEYS
), inserted AS (
    INSERT INTO #TABLE_NAME (#COLUMNS)
    SELECT #COLUMNS FROM (VALUES
        #VALUES
    ) AS batch (#COLUMNS, batch_ordinal)
    WHERE (SELECT COUNT(1) FROM purged) + (SELECT COUNT(1) FROM removed) >= 0
    ORDER BY batch_ordinal
    RETURNING #PRIMARY_KEY
)
SELECT array_agg(#PRIMARY_KEY ORDER BY #PRIMARY_KEY) FROM inserted";

pub(crate) const UPDATE: &str = "\
UPDATE #TABLE_NAME AS #TABLE_ALIAS
SET #VALUES_TO_UPDATE
#WHERE";

pub(crate) const DELETE: &str = "\
DELETE FROM #TABLE_NAME AS #TABLE_ALIAS
#WHERE";
