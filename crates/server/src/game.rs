use glam::Vec2;

use riftline::{
    BehaviorError, ClientInput, EntityBehavior, EntityCore, EntityId, EntityKind, GameEvent,
    InputKind, InputPayload, PlayerId, TeamId, World, WorldCtx,
};

pub const CHAMPION_SPEED: f32 = 325.0;
pub const PROJECTILE_SPEED: f32 = 1200.0;
const RECALL_SECONDS: f32 = 8.0;
const WARD_LIFETIME_SECONDS: f32 = 90.0;
const WAVE_INTERVAL_SECONDS: f32 = 30.0;
const MINIONS_PER_WAVE: u32 = 3;
const MINION_SPEED: f32 = 220.0;
const PROJECTILE_HIT_RANGE: f32 = 10.0;

fn walk_toward(position: Vec2, target: Vec2, speed: f32, dt: f32) -> (Vec2, bool) {
    let to_target = target - position;
    let step = speed * dt;
    if to_target.length() <= step {
        (target, true)
    } else {
        (position + to_target.normalize() * step, false)
    }
}

fn id_event(kind: &str, id: &EntityId) -> GameEvent {
    GameEvent::custom(kind, id.as_str().as_bytes().to_vec())
}

/// Player-controlled champion: walks to ordered destinations, recalls on a
/// tick-counted timer, places wards, and fires a projectile at the ability
/// target. Everything the input pipeline can carry ends up here.
pub struct ChampionBehavior {
    home: Vec2,
    speed: f32,
    destination: Option<Vec2>,
    recall_remaining: Option<f32>,
    level: u8,
    wards_placed: u16,
    projectiles_fired: u16,
}

impl ChampionBehavior {
    pub fn new(home: Vec2) -> Self {
        Self {
            home,
            speed: CHAMPION_SPEED,
            destination: None,
            recall_remaining: None,
            level: 1,
            wards_placed: 0,
            projectiles_fired: 0,
        }
    }

    pub fn is_recalling(&self) -> bool {
        self.recall_remaining.is_some()
    }
}

impl EntityBehavior for ChampionBehavior {
    fn step(
        &mut self,
        core: &mut EntityCore,
        dt: f32,
        world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        if let Some(remaining) = &mut self.recall_remaining {
            *remaining -= dt;
            if *remaining <= 0.0 {
                core.position = self.home;
                self.recall_remaining = None;
                world.emit_event(id_event("recall_finished", &core.id));
            }
            return Ok(());
        }

        if let Some(destination) = self.destination {
            let (position, arrived) = walk_toward(core.position, destination, self.speed, dt);
            core.position = position;
            if arrived {
                self.destination = None;
            }
        }
        Ok(())
    }

    fn handle_input(
        &mut self,
        core: &mut EntityCore,
        input: &ClientInput,
        world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        match (input.kind, &input.payload) {
            (InputKind::Move | InputKind::AttackMove, InputPayload::Point { x, y }) => {
                self.destination = Some(Vec2::new(*x, *y));
                self.recall_remaining = None;
            }
            (InputKind::TargetUnit, InputPayload::Unit { target }) => {
                if let Some(target) = world.get(target) {
                    self.destination = Some(target.position);
                    self.recall_remaining = None;
                }
            }
            (InputKind::Stop, _) => {
                self.destination = None;
                self.recall_remaining = None;
            }
            (InputKind::Ability, InputPayload::Ability { target, .. }) => {
                if let Some(target) = target {
                    self.projectiles_fired += 1;
                    let projectile_id =
                        EntityId::new(format!("{}-proj-{}", core.id, self.projectiles_fired));
                    world
                        .spawn(
                            EntityCore::new(
                                projectile_id,
                                EntityKind::Projectile,
                                core.side,
                                core.position,
                            ),
                            Box::new(ProjectileBehavior::new(core.id.clone(), target.clone())),
                        )
                        .map_err(|e| BehaviorError::Invariant(e.to_string()))?;
                }
                world.emit_event(id_event("ability_cast", &core.id));
            }
            (InputKind::LevelUp, InputPayload::Slot { .. }) => {
                if self.level < 18 {
                    self.level += 1;
                }
                world.emit_event(id_event("level_up", &core.id));
            }
            (InputKind::BuyItem, InputPayload::Item { .. }) => {
                world.emit_event(id_event("item_bought", &core.id));
            }
            (InputKind::SellItem, InputPayload::Item { .. }) => {
                world.emit_event(id_event("item_sold", &core.id));
            }
            (InputKind::Recall, _) => {
                self.destination = None;
                self.recall_remaining = Some(RECALL_SECONDS);
                world.emit_event(id_event("recall_started", &core.id));
            }
            (InputKind::PlaceWard, InputPayload::Point { x, y }) => {
                self.wards_placed += 1;
                let ward_id = EntityId::new(format!("{}-ward-{}", core.id, self.wards_placed));
                world
                    .spawn(
                        EntityCore::new(
                            ward_id,
                            EntityKind::Ward,
                            core.side,
                            Vec2::new(*x, *y),
                        ),
                        Box::new(WardBehavior::new()),
                    )
                    .map_err(|e| BehaviorError::Invariant(e.to_string()))?;
            }
            (InputKind::Ping, InputPayload::Point { x, y }) => {
                let mut data = core.id.as_str().as_bytes().to_vec();
                data.extend_from_slice(&x.to_le_bytes());
                data.extend_from_slice(&y.to_le_bytes());
                world.emit_event(GameEvent::custom("map_ping", data));
            }
            (InputKind::Chat, InputPayload::Chat { text }) => {
                let mut data = core.id.as_str().as_bytes().to_vec();
                data.push(b':');
                data.extend_from_slice(text.as_bytes());
                world.emit_event(GameEvent::custom("chat", data));
            }
            _ => {}
        }
        Ok(())
    }

    fn payload(&self) -> Vec<u8> {
        vec![self.level, self.recall_remaining.is_some() as u8]
    }

    fn radius(&self) -> f32 {
        25.0
    }
}

/// Lane minion: marches to the enemy base and expires there. Exercises the
/// dead-for-one-tick removal path end to end.
pub struct MinionBehavior {
    objective: Vec2,
}

impl MinionBehavior {
    pub fn new(objective: Vec2) -> Self {
        Self { objective }
    }
}

impl EntityBehavior for MinionBehavior {
    fn step(
        &mut self,
        core: &mut EntityCore,
        dt: f32,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        let (position, arrived) = walk_toward(core.position, self.objective, MINION_SPEED, dt);
        core.position = position;
        if arrived {
            core.is_dead = true;
        }
        Ok(())
    }

    fn handle_input(
        &mut self,
        _core: &mut EntityCore,
        _input: &ClientInput,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn radius(&self) -> f32 {
        15.0
    }
}

/// Homing projectile. Caster and target are weak `EntityId` references
/// resolved through the world each tick; a vanished target ends the flight.
pub struct ProjectileBehavior {
    caster: EntityId,
    target: EntityId,
}

impl ProjectileBehavior {
    pub fn new(caster: EntityId, target: EntityId) -> Self {
        Self { caster, target }
    }
}

impl EntityBehavior for ProjectileBehavior {
    fn step(
        &mut self,
        core: &mut EntityCore,
        dt: f32,
        world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        let Some(target) = world.get(&self.target) else {
            world.despawn(&core.id);
            return Ok(());
        };
        let target_pos = target.position;
        let (position, _) = walk_toward(core.position, target_pos, PROJECTILE_SPEED, dt);
        core.position = position;

        if core.position.distance(target_pos) <= PROJECTILE_HIT_RANGE {
            let mut data = self.caster.as_str().as_bytes().to_vec();
            data.push(b'>');
            data.extend_from_slice(self.target.as_str().as_bytes());
            world.emit_event(GameEvent::custom("projectile_hit", data));
            world.despawn(&core.id);
        }
        Ok(())
    }

    fn handle_input(
        &mut self,
        _core: &mut EntityCore,
        _input: &ClientInput,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn payload(&self) -> Vec<u8> {
        self.caster.as_str().as_bytes().to_vec()
    }

    fn is_collidable(&self) -> bool {
        false
    }

    fn radius(&self) -> f32 {
        5.0
    }
}

/// Vision ward on a lifetime timer, advanced by `dt` like every other
/// tick-counted effect.
pub struct WardBehavior {
    remaining: f32,
}

impl WardBehavior {
    pub fn new() -> Self {
        Self {
            remaining: WARD_LIFETIME_SECONDS,
        }
    }
}

impl Default for WardBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityBehavior for WardBehavior {
    fn step(
        &mut self,
        core: &mut EntityCore,
        dt: f32,
        world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        self.remaining -= dt;
        if self.remaining <= 0.0 {
            world.despawn(&core.id);
        }
        Ok(())
    }

    fn handle_input(
        &mut self,
        _core: &mut EntityCore,
        _input: &ClientInput,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn is_collidable(&self) -> bool {
        false
    }

    fn radius(&self) -> f32 {
        1.0
    }
}

/// Nexus: immobile objective that also drives the minion wave clock for its
/// side.
pub struct NexusBehavior {
    lane_objective: Vec2,
    wave_timer: f32,
    wave_count: u32,
}

impl NexusBehavior {
    pub fn new(lane_objective: Vec2) -> Self {
        Self {
            lane_objective,
            // First wave marches shortly after game start.
            wave_timer: 5.0,
            wave_count: 0,
        }
    }
}

impl EntityBehavior for NexusBehavior {
    fn step(
        &mut self,
        core: &mut EntityCore,
        dt: f32,
        world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        self.wave_timer -= dt;
        if self.wave_timer > 0.0 {
            return Ok(());
        }
        self.wave_timer += WAVE_INTERVAL_SECONDS;
        self.wave_count += 1;

        for i in 0..MINIONS_PER_WAVE {
            let minion_id = EntityId::new(format!(
                "minion-{}-{}-{}",
                core.id, self.wave_count, i
            ));
            let offset = Vec2::new(0.0, (i as f32 - 1.0) * 40.0);
            world
                .spawn(
                    EntityCore::new(
                        minion_id,
                        EntityKind::Minion,
                        core.side,
                        core.position + offset,
                    ),
                    Box::new(MinionBehavior::new(self.lane_objective)),
                )
                .map_err(|e| BehaviorError::Invariant(e.to_string()))?;
        }
        Ok(())
    }

    fn handle_input(
        &mut self,
        _core: &mut EntityCore,
        _input: &ClientInput,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn radius(&self) -> f32 {
        60.0
    }
}

/// Towers and jungle camps: scenery with a footprint.
pub struct StaticBehavior {
    radius: f32,
}

impl StaticBehavior {
    pub fn tower() -> Self {
        Self { radius: 40.0 }
    }

    pub fn camp() -> Self {
        Self { radius: 30.0 }
    }
}

impl EntityBehavior for StaticBehavior {
    fn step(
        &mut self,
        _core: &mut EntityCore,
        _dt: f32,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn handle_input(
        &mut self,
        _core: &mut EntityCore,
        _input: &ClientInput,
        _world: &mut WorldCtx<'_>,
    ) -> Result<(), BehaviorError> {
        Ok(())
    }

    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn radius(&self) -> f32 {
        self.radius
    }
}

pub fn base_position(side: TeamId) -> Vec2 {
    match side {
        TeamId::Blue => Vec2::new(-1700.0, 100.0),
        TeamId::Red => Vec2::new(1700.0, 100.0),
        TeamId::Neutral => Vec2::ZERO,
    }
}

/// Populate the arena: a nexus and two towers per side, neutral camps in
/// the river.
pub fn seed_arena(world: &mut World) -> Result<(), riftline::WorldError> {
    let blue_nexus = Vec2::new(-1800.0, 0.0);
    let red_nexus = Vec2::new(1800.0, 0.0);

    world.spawn(
        EntityCore::new(
            EntityId::new("nexus-blue"),
            EntityKind::Nexus,
            TeamId::Blue,
            blue_nexus,
        ),
        Box::new(NexusBehavior::new(red_nexus)),
    )?;
    world.spawn(
        EntityCore::new(
            EntityId::new("nexus-red"),
            EntityKind::Nexus,
            TeamId::Red,
            red_nexus,
        ),
        Box::new(NexusBehavior::new(blue_nexus)),
    )?;

    for (name, side, x) in [
        ("tower-blue-outer", TeamId::Blue, -600.0),
        ("tower-blue-inner", TeamId::Blue, -1200.0),
        ("tower-red-outer", TeamId::Red, 600.0),
        ("tower-red-inner", TeamId::Red, 1200.0),
    ] {
        world.spawn(
            EntityCore::new(
                EntityId::new(name),
                EntityKind::Tower,
                side,
                Vec2::new(x, 0.0),
            ),
            Box::new(StaticBehavior::tower()),
        )?;
    }

    for (name, y) in [("camp-north", 800.0), ("camp-south", -800.0)] {
        world.spawn(
            EntityCore::new(
                EntityId::new(name),
                EntityKind::JungleCamp,
                TeamId::Neutral,
                Vec2::new(0.0, y),
            ),
            Box::new(StaticBehavior::camp()),
        )?;
    }
    Ok(())
}

/// Champion entity id for a player's nth join. Entity ids are never reused,
/// so a player whose session expired comes back as a new generation.
pub fn champion_entity_id(player_id: &PlayerId, generation: u32) -> EntityId {
    EntityId::new(format!("champ-{player_id}-{generation}"))
}

pub fn spawn_champion(
    world: &mut World,
    player_id: &PlayerId,
    side: TeamId,
    entity_id: EntityId,
) -> Result<EntityId, riftline::WorldError> {
    let home = base_position(side);
    world.spawn(
        EntityCore::new(entity_id.clone(), EntityKind::Champion, side, home),
        Box::new(ChampionBehavior::new(home)),
    )?;
    world.bind_controller(player_id.clone(), entity_id.clone());
    Ok(entity_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use riftline::DrainedInputs;

    const DT: f32 = 0.008;

    fn input(seq: u32, kind: InputKind, payload: InputPayload) -> ClientInput {
        ClientInput::new(seq, 0, kind, payload)
    }

    fn drained(player: &PlayerId, inputs: Vec<ClientInput>) -> Vec<DrainedInputs> {
        vec![DrainedInputs {
            player_id: player.clone(),
            inputs,
        }]
    }

    fn world_with_champion() -> (World, PlayerId, EntityId) {
        let mut world = World::new(0);
        let player = PlayerId::new("p1");
        let entity_id = champion_entity_id(&player, 1);
        let entity = spawn_champion(&mut world, &player, TeamId::Blue, entity_id).unwrap();
        (world, player, entity)
    }

    fn run_ticks(world: &mut World, inputs: Vec<DrainedInputs>, ticks: u32) {
        for i in 0..ticks {
            let batch = if i == 0 { inputs.clone() } else { Vec::new() };
            world.update(DT, &batch);
            world.advance_tick();
        }
    }

    #[test]
    fn champion_walks_toward_move_order() {
        let (mut world, player, entity) = world_with_champion();
        let home = base_position(TeamId::Blue);
        let order = input(
            1,
            InputKind::Move,
            InputPayload::Point {
                x: home.x + 100.0,
                y: home.y,
            },
        );
        run_ticks(&mut world, drained(&player, vec![order]), 10);

        let pos = world.get(&entity).unwrap().position;
        let walked = pos.x - home.x;
        assert!((walked - CHAMPION_SPEED * DT * 10.0).abs() < 0.5, "walked {walked}");
    }

    #[test]
    fn recall_teleports_home_after_timer() {
        let (mut world, player, entity) = world_with_champion();
        let home = base_position(TeamId::Blue);

        // Walk away first, then recall and wait out the timer.
        let away = input(1, InputKind::Move, InputPayload::Point { x: 0.0, y: 0.0 });
        run_ticks(&mut world, drained(&player, vec![away]), 50);
        assert_ne!(world.get(&entity).unwrap().position, home);

        let recall = input(2, InputKind::Recall, InputPayload::Empty);
        let ticks = (RECALL_SECONDS / DT).ceil() as u32 + 2;
        run_ticks(&mut world, drained(&player, vec![recall]), ticks);
        assert_eq!(world.get(&entity).unwrap().position, home);
    }

    #[test]
    fn move_order_cancels_recall() {
        let (mut world, player, entity) = world_with_champion();
        let home = base_position(TeamId::Blue);

        let recall = input(1, InputKind::Recall, InputPayload::Empty);
        run_ticks(&mut world, drained(&player, vec![recall]), 10);

        let away = input(
            2,
            InputKind::Move,
            InputPayload::Point { x: home.x + 50.0, y: home.y },
        );
        let ticks = (RECALL_SECONDS / DT).ceil() as u32;
        run_ticks(&mut world, drained(&player, vec![away]), ticks);

        // Recall was interrupted: the champion walked instead of porting.
        let pos = world.get(&entity).unwrap().position;
        assert_eq!(pos, Vec2::new(home.x + 50.0, home.y));
    }

    #[test]
    fn ward_spawns_and_expires() {
        let (mut world, player, entity) = world_with_champion();
        let place = input(
            1,
            InputKind::PlaceWard,
            InputPayload::Point { x: -500.0, y: 200.0 },
        );
        run_ticks(&mut world, drained(&player, vec![place]), 2);

        let ward_id = EntityId::new(format!("{entity}-ward-1"));
        let ward = world.get(&ward_id).expect("ward exists");
        assert_eq!(ward.kind, EntityKind::Ward);
        assert_eq!(ward.side, TeamId::Blue);

        let lifetime_ticks = (WARD_LIFETIME_SECONDS / DT).ceil() as u32 + 2;
        run_ticks(&mut world, Vec::new(), lifetime_ticks);
        assert!(!world.contains(&ward_id));
    }

    #[test]
    fn ability_fires_projectile_that_chases_its_target() {
        let mut world = World::new(0);
        let player = PlayerId::new("p1");
        let champion = spawn_champion(
            &mut world,
            &player,
            TeamId::Blue,
            champion_entity_id(&player, 1),
        )
        .unwrap();
        let target = EntityId::new("dummy");
        world
            .spawn(
                EntityCore::new(
                    target.clone(),
                    EntityKind::JungleCamp,
                    TeamId::Neutral,
                    base_position(TeamId::Blue) + Vec2::new(300.0, 0.0),
                ),
                Box::new(StaticBehavior::camp()),
            )
            .unwrap();

        let cast = input(
            1,
            InputKind::Ability,
            InputPayload::Ability {
                slot: 0,
                x: 0.0,
                y: 0.0,
                target: Some(target.clone()),
            },
        );
        run_ticks(&mut world, drained(&player, vec![cast]), 2);

        let projectile_id = EntityId::new(format!("{champion}-proj-1"));
        assert!(world.contains(&projectile_id));

        // 300 units at 1200 u/s is a quarter second; give it half.
        run_ticks(&mut world, Vec::new(), 63);
        assert!(!world.contains(&projectile_id), "projectile should hit and despawn");
    }

    #[test]
    fn projectile_despawns_when_target_vanishes() {
        let mut world = World::new(0);
        world
            .spawn(
                EntityCore::new(
                    EntityId::new("proj"),
                    EntityKind::Projectile,
                    TeamId::Blue,
                    Vec2::ZERO,
                ),
                Box::new(ProjectileBehavior::new(
                    EntityId::new("ghost-caster"),
                    EntityId::new("ghost-target"),
                )),
            )
            .unwrap();

        run_ticks(&mut world, Vec::new(), 2);
        assert!(!world.contains(&EntityId::new("proj")));
    }

    #[test]
    fn nexus_marches_waves_that_die_at_the_enemy_base() {
        let mut world = World::new(0);
        seed_arena(&mut world).unwrap();

        // First wave leaves 5 seconds in.
        let ticks_to_wave = (5.0 / DT).ceil() as u32 + 2;
        run_ticks(&mut world, Vec::new(), ticks_to_wave);

        let minion = EntityId::new("minion-nexus-blue-1-0");
        assert!(world.contains(&minion));
        assert_eq!(world.get(&minion).unwrap().kind, EntityKind::Minion);

        // 3600 units at 220 u/s: under 17 seconds to cross; then it dies
        // and is removed after the terminal tick.
        let crossing_ticks = (17.0 / DT).ceil() as u32 + 4;
        run_ticks(&mut world, Vec::new(), crossing_ticks);
        assert!(!world.contains(&minion));
    }

    #[test]
    fn chat_and_ping_surface_as_events() {
        let (mut world, player, _entity) = world_with_champion();
        let chat = input(
            1,
            InputKind::Chat,
            InputPayload::Chat {
                text: "gl hf".into(),
            },
        );
        let ping = input(
            2,
            InputKind::Ping,
            InputPayload::Point { x: 10.0, y: 20.0 },
        );
        world.update(DT, &drained(&player, vec![chat, ping]));

        let kinds: Vec<&str> = world.tick_events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["chat", "map_ping"]);
    }
}
