use crate::error::Result;
use crate::geometry::{Bounds, bounds_from_geometry, gpkg_geometry_to_wkb};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};

type BoundsAccessor = fn(&Bounds) -> f64;

fn min_x(b: &Bounds) -> f64 {
    b.minx
}

fn max_x(b: &Bounds) -> f64 {
    b.maxx
}

fn min_y(b: &Bounds) -> f64 {
    b.miny
}

fn max_y(b: &Bounds) -> f64 {
    b.maxy
}

const BOUNDS_FUNCTIONS: [(&str, BoundsAccessor); 4] = [
    ("ST_MinX", min_x),
    ("ST_MaxX", max_x),
    ("ST_MinY", min_y),
    ("ST_MaxY", max_y),
];

/// Register `ST_MinX`, `ST_MaxX`, `ST_MinY`, `ST_MaxY` and `ST_IsEmpty` on
/// `conn`. The R-tree triggers of every spatially indexed layer call them.
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    for (name, accessor) in BOUNDS_FUNCTIONS {
        conn.create_scalar_function(name, 1, flags, move |ctx| {
            Ok(blob_bounds(ctx)?.flatten().map(|bounds| accessor(&bounds)))
        })?;
    }
    conn.create_scalar_function("ST_IsEmpty", 1, flags, |ctx| {
        Ok(blob_bounds(ctx)?.map(|bounds| i64::from(bounds.is_none())))
    })?;
    Ok(())
}

// Outer `None` for SQL NULL, inner `None` for an empty geometry.
fn blob_bounds(ctx: &Context<'_>) -> rusqlite::Result<Option<Option<Bounds>>> {
    let blob = match ctx.get_raw(0) {
        ValueRef::Null => return Ok(None),
        ValueRef::Blob(blob) => blob,
        _ => return Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    };
    let wkb = gpkg_geometry_to_wkb(blob).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
    Ok(Some(bounds_from_geometry(&wkb)))
}

#[cfg(test)]
mod tests {
    use super::register_spatial_functions;
    use crate::Result;
    use crate::geometry::wkb_to_gpkg_geometry;
    use crate::test_support::{fixture_gpkg, roads_snapshot, wkb_of};
    use geo_types::{LineString, Polygon};
    use rusqlite::{Connection, params};

    #[test]
    fn bounds_of_a_polygon_blob() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        let square = Polygon::new(
            LineString::from(vec![(-1.0, 2.0), (4.0, 2.0), (4.0, 7.5), (-1.0, 2.0)]),
            vec![],
        );
        let blob = wkb_to_gpkg_geometry(&wkb_of(square), 4326);

        let row: (f64, f64, f64, f64, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;
        assert_eq!(row, (-1.0, 4.0, 2.0, 7.5, 0));
        Ok(())
    }

    #[test]
    fn empty_and_null_geometries() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        let empty = wkb_to_gpkg_geometry(&wkb_of(LineString::<f64>::new(Vec::new())), 4326);

        let (minx, is_empty, null_empty): (Option<f64>, i64, Option<i64>) = conn.query_row(
            "SELECT ST_MinX(?1), ST_IsEmpty(?1), ST_IsEmpty(NULL)",
            params![empty],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        assert_eq!(minx, None);
        assert_eq!(is_empty, 1);
        assert_eq!(null_empty, None);

        assert!(conn.query_row("SELECT ST_MinX('text')", [], |row| row.get::<_, f64>(0)).is_err());
        Ok(())
    }

    #[test]
    fn rtree_triggers_fill_the_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("roads.gpkg");
        fixture_gpkg(&path, &[("roads", roads_snapshot())])?;

        let conn = Connection::open(&path)?;
        register_spatial_functions(&conn)?;
        let blob = wkb_to_gpkg_geometry(&wkb_of(LineString::from(vec![(10.0, 10.0), (12.0, 15.0)])), 4326);
        conn.execute(
            r#"INSERT INTO "roads" ("geom", "name") VALUES (?1, 'Bypass')"#,
            params![blob],
        )?;
        let (count, maxy): (i64, f64) = conn.query_row(
            r#"SELECT count(*), max(maxy) FROM "rtree_roads_geom""#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(count, 4);
        assert_eq!(maxy, 15.0);
        Ok(())
    }
}
