//! Cluster forest construction
//!
//! Each city gets one forest per cluster type. Leaf sizes are fitted to the
//! city's population; each higher level is fitted to the number of clusters
//! on the level below. Children are then linked to parents, mostly within
//! their own city and otherwise in a nearby city that has the same level.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::core::config::ClusterType;
use crate::core::error::{EpiError, Result};
use crate::core::types::{CityId, ClusterId};
use crate::epidemic::city::City;
use crate::epidemic::cluster::{Cluster, ClusterArena, ClusterFamily, ClusterLevel};
use crate::sampling::{SizeDistributionFitter, WeightedSampler};

/// Redraws allowed when the drawn parent already has all its children
const MAX_PARENT_REDRAWS: usize = 8;

/// Sampler over one level, weighted by fitted size or by expected population
fn level_sampler(
    arena: &ClusterArena,
    clusters: &[ClusterId],
    by_population: bool,
) -> Result<WeightedSampler<ClusterId>> {
    WeightedSampler::build(clusters.to_vec(), |id| {
        arena
            .get(*id)
            .map(|c| (if by_population { c.population } else { c.size }) as f64)
            .unwrap_or(0.0)
    })
}

/// Fit and create every level of one cluster type for one city
pub fn build_family(
    arena: &mut ClusterArena,
    city: &City,
    cluster_type: &ClusterType,
    rng: &mut ChaCha8Rng,
) -> Result<ClusterFamily> {
    let population = city.target_population;
    let leaf_max = ((cluster_type.max_pop as f64)
        .min((population as f64 * cluster_type.max_proportion).floor()) as u32)
        .max(cluster_type.min_pop);
    let leaf_count = leaf_count(population, cluster_type.average_pop, leaf_max);

    let leaf_sizes = SizeDistributionFitter::new(leaf_count, cluster_type.min_pop, leaf_max, population as u64)
        .and_then(|fitter| fitter.fit(&mut *rng))
        .map_err(|e| in_city(e, city, cluster_type))?;

    let mut levels = vec![make_level(arena, city, cluster_type, 0, &leaf_sizes, rng)?];

    let mut count = leaf_count;
    let mut depth = 0;
    loop {
        if cluster_type.max_depth.is_some_and(|max| depth >= max) {
            break;
        }
        let next = count / cluster_type.nest_average as usize;
        if next <= cluster_type.min_nested_count as usize || next == 0 {
            break;
        }

        let room = count.saturating_sub((next - 1) * cluster_type.nest_min as usize);
        let nest_max = (cluster_type.nest_max as usize).min(room) as u32;
        let sizes = SizeDistributionFitter::new(
            next,
            cluster_type.nest_min,
            nest_max.max(cluster_type.nest_min),
            count as u64,
        )
        .and_then(|fitter| fitter.fit(&mut *rng))
        .map_err(|e| in_city(e, city, cluster_type))?;

        depth += 1;
        levels.push(make_level(arena, city, cluster_type, depth, &sizes, rng)?);
        count = next;
    }

    Ok(ClusterFamily {
        cluster_type: cluster_type.id,
        levels,
    })
}

/// Leaves per city: one per `average_pop` people, raised until the mean
/// leaf is at most half the cap so the fitter has room to skew
fn leaf_count(population: u32, average_pop: u32, leaf_max: u32) -> usize {
    let nominal = (population / average_pop).max(1);
    if nominal <= 2 && population as u64 <= nominal as u64 * leaf_max as u64 {
        return nominal as usize;
    }
    nominal.max(3).max((2 * population).div_ceil(leaf_max)) as usize
}

/// Name the city and cluster type in a fitting error
fn in_city(error: EpiError, city: &City, cluster_type: &ClusterType) -> EpiError {
    let context = |message: String| {
        format!(
            "city {} (population {}), cluster type '{}': {}",
            city.name, city.target_population, cluster_type.name, message
        )
    };
    match error {
        EpiError::Value(message) => EpiError::Value(context(message)),
        EpiError::Build(message) => EpiError::Build(context(message)),
        other => other,
    }
}

fn make_level(
    arena: &mut ClusterArena,
    city: &City,
    cluster_type: &ClusterType,
    depth: u32,
    sizes: &[u32],
    rng: &mut ChaCha8Rng,
) -> Result<ClusterLevel> {
    let clusters: Vec<ClusterId> = sizes
        .iter()
        .enumerate()
        .map(|(index, &size)| {
            let location = city.random_location(rng);
            arena.insert_with(|id| {
                Cluster::new(
                    id,
                    format!("{}.{}.{}.{}", city.name, cluster_type.name, depth, index),
                    cluster_type.id,
                    depth,
                    city.id,
                    size,
                    location,
                    cluster_type.attenuation,
                )
            })
        })
        .collect();

    let sampler = level_sampler(arena, &clusters, false)?;
    Ok(ClusterLevel {
        depth,
        clusters,
        sampler,
    })
}

/// Link every non-top cluster to a parent one level up, then
/// back-propagate expected populations and rebuild the level samplers
pub fn nest_clusters(
    cities: &mut [City],
    arena: &mut ClusterArena,
    cluster_types: &[ClusterType],
    rng: &mut ChaCha8Rng,
) -> Result<()> {
    let deepest = cities
        .iter()
        .flat_map(|c| c.families.iter().map(|f| f.depth()))
        .max()
        .unwrap_or(0);

    let mut links = 0usize;
    for depth in 0..deepest.saturating_sub(1) {
        for cluster_type in cluster_types {
            let type_index = cluster_type.id.index();
            let parent_depth = depth + 1;
            let hosts: Vec<bool> = cities
                .iter()
                .map(|c| c.families.get(type_index).is_some_and(|f| f.levels.len() > parent_depth))
                .collect();

            for city_index in 0..cities.len() {
                if !hosts[city_index] {
                    continue;
                }
                let children = cities[city_index].families[type_index].levels[depth].clusters.clone();
                let elsewhere = distant_hosts(&cities[city_index], &hosts)?;

                for child in children {
                    let host = match &elsewhere {
                        Some(sampler) if rng.gen::<f64>() >= cluster_type.same_city => {
                            sampler.choose(rng).0.index()
                        }
                        _ => city_index,
                    };
                    let level = &cities[host].families[type_index].levels[parent_depth];
                    let parent = choose_parent(level, arena, rng)?;
                    arena.link(child, parent)?;
                    links += 1;
                }
            }
        }
    }

    back_propagate(cities, arena, deepest)?;
    tracing::debug!(links, deepest, "nested clusters");
    Ok(())
}

/// Other cities with the parent level, drawn by inverse distance
fn distant_hosts(city: &City, hosts: &[bool]) -> Result<Option<WeightedSampler<(CityId, f64)>>> {
    let candidates: Vec<(CityId, f64)> = city
        .neighbors
        .iter()
        .filter(|n| hosts.get(n.city.index()).copied().unwrap_or(false))
        .map(|n| (n.city, n.distance))
        .collect();
    if candidates.is_empty() {
        return Ok(None);
    }

    let sampler = WeightedSampler::build(candidates, |(_, distance)| 1.0 / distance.max(f64::EPSILON))?;
    Ok(Some(sampler))
}

fn choose_parent(level: &ClusterLevel, arena: &ClusterArena, rng: &mut ChaCha8Rng) -> Result<ClusterId> {
    let mut parent = *level.sampler.choose(rng);
    for _ in 0..MAX_PARENT_REDRAWS {
        if !arena.get(parent)?.is_full() {
            break;
        }
        parent = *level.sampler.choose(rng);
    }
    Ok(parent)
}

/// Sum expected populations leaf to root, then reweight every level
fn back_propagate(cities: &mut [City], arena: &mut ClusterArena, deepest: usize) -> Result<()> {
    for depth in 1..deepest {
        for city in cities.iter() {
            for family in &city.families {
                let Some(level) = family.levels.get(depth) else {
                    continue;
                };
                for &id in &level.clusters {
                    let children = arena.get(id)?.children.clone();
                    let mut population = 0;
                    for child in children {
                        population += arena.get(child)?.population;
                    }
                    arena.get_mut(id)?.population = population;
                }
            }
        }
    }

    for city in cities.iter_mut() {
        for family in city.families.iter_mut() {
            for level in family.levels.iter_mut() {
                // A level whose children all went to other cities has no population
                level.sampler = level_sampler(arena, &level.clusters, true)
                    .or_else(|_| level_sampler(arena, &level.clusters, false))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SimulationConfig;
    use crate::core::types::Point;
    use rand::SeedableRng;

    fn work_type() -> ClusterType {
        SimulationConfig::default()
            .cluster_types()
            .unwrap()
            .into_iter()
            .find(|t| t.name == "work")
            .unwrap()
    }

    #[test]
    fn test_leaf_sizes_cover_city() {
        let mut arena = ClusterArena::new();
        let city = City::new(CityId(0), Point::default(), 3000, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let family = build_family(&mut arena, &city, &work_type(), &mut rng).unwrap();

        let leaves = family.leaves().unwrap();
        assert_eq!(leaves.clusters.len(), 150);
        let total: u32 = leaves.clusters.iter().map(|id| arena.get(*id).unwrap().size).sum();
        assert_eq!(total, 3000);
    }

    #[test]
    fn test_leaves_never_exceed_max_pop() {
        let mut arena = ClusterArena::new();
        let city = City::new(CityId(0), Point::default(), 3000, 1.0);
        let mut cluster_type = work_type();
        cluster_type.min_pop = 2;
        cluster_type.max_pop = 30;
        cluster_type.average_pop = 20;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let family = build_family(&mut arena, &city, &cluster_type, &mut rng).unwrap();

        let leaves = family.leaves().unwrap();
        // 150 nominal leaves would average 20 against a cap of 30
        assert_eq!(leaves.clusters.len(), 200);
        let sizes: Vec<u32> = leaves.clusters.iter().map(|id| arena.get(*id).unwrap().size).collect();
        assert!(sizes.iter().all(|&s| (2..=30).contains(&s)), "{:?}", sizes);
        assert_eq!(sizes.iter().sum::<u32>(), 3000);
    }

    #[test]
    fn test_leaf_count_keeps_small_counts_that_fit() {
        assert_eq!(leaf_count(500, 500, 500), 1);
        assert_eq!(leaf_count(10, 3, 8), 3);
        assert_eq!(leaf_count(10, 6, 8), 3);
        assert_eq!(leaf_count(3000, 20, 500), 150);
        assert_eq!(leaf_count(90, 20, 18), 10);
    }

    #[test]
    fn test_tiny_city_error_names_city_and_type() {
        let mut arena = ClusterArena::new();
        let city = City::new(CityId(3), Point::default(), 8, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let error = build_family(&mut arena, &city, &work_type(), &mut rng).unwrap_err();

        match error {
            EpiError::Value(message) => {
                assert!(message.contains(&city.name), "{}", message);
                assert!(message.contains("'work'"), "{}", message);
            }
            other => panic!("expected a value error, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_level_counts_children() {
        let mut arena = ClusterArena::new();
        let city = City::new(CityId(0), Point::default(), 3000, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let family = build_family(&mut arena, &city, &work_type(), &mut rng).unwrap();

        // 150 leaves / 10 = 15 parents, and 15 / 10 is too few to nest again
        assert_eq!(family.depth(), 2);
        let parents = family.level(1).unwrap();
        assert_eq!(parents.clusters.len(), 15);
        let slots: u32 = parents.clusters.iter().map(|id| arena.get(*id).unwrap().size).sum();
        assert_eq!(slots, 150);
    }

    #[test]
    fn test_max_depth_zero_keeps_leaves_only() {
        let mut arena = ClusterArena::new();
        let city = City::new(CityId(0), Point::default(), 3000, 1.0);
        let mut cluster_type = work_type();
        cluster_type.max_depth = Some(0);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let family = build_family(&mut arena, &city, &cluster_type, &mut rng).unwrap();
        assert_eq!(family.depth(), 1);
    }

    #[test]
    fn test_nesting_links_every_child() {
        let cluster_type = work_type();
        let mut arena = ClusterArena::new();
        let mut cities = vec![
            City::new(CityId(0), Point::new(10.0, 10.0), 3000, 1.0),
            City::new(CityId(1), Point::new(20.0, 10.0), 3000, 1.0),
        ];
        let places: Vec<(CityId, Point)> = cities.iter().map(|c| (c.id, c.location)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for city in cities.iter_mut() {
            city.make_neighbors(&places).unwrap();
        }
        for index in 0..cities.len() {
            let family = build_family(&mut arena, &cities[index], &cluster_type, &mut rng).unwrap();
            cities[index].families.push(family);
        }

        nest_clusters(&mut cities, &mut arena, std::slice::from_ref(&cluster_type), &mut rng).unwrap();

        let mut cross_city = 0;
        for city in &cities {
            let family = &city.families[0];
            for &leaf in &family.levels[0].clusters {
                let cluster = arena.get(leaf).unwrap();
                let parent = arena.get(cluster.parent.unwrap()).unwrap();
                assert_eq!(parent.depth, 1);
                if parent.city != cluster.city {
                    cross_city += 1;
                }
            }
            // Expected population flows up to the parents
            let top: u32 = family.levels[1]
                .clusters
                .iter()
                .map(|id| arena.get(*id).unwrap().population)
                .sum();
            assert!(top > 0);
        }
        // same_city = 0.8, 300 leaves
        assert!(cross_city > 20 && cross_city < 110, "cross-city links: {}", cross_city);

        let all_people: u32 = cities
            .iter()
            .flat_map(|c| c.families[0].levels[1].clusters.iter())
            .map(|id| arena.get(*id).unwrap().population)
            .sum();
        assert_eq!(all_people, 6000);
    }
}
