//! Lookup collaborators: intrinsic and event names, and debug symbols for globals.
//!
//! None of this is consulted while folding. The pseudocode emitter receives the
//! tables by reference to decorate calls, globals and function headers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DeucError;

#[derive(Debug, Clone, Copy)]
pub struct NameTables<'a> {
    pub intrinsics: &'a [&'a str],
    pub events: &'a [&'a str],
}

impl NameTables<'static> {
    pub fn u8() -> Self {
        Self { intrinsics: U8_INTRINSICS, events: U8_EVENTS }
    }
}

impl Default for NameTables<'static> {
    fn default() -> Self {
        Self::u8()
    }
}

impl NameTables<'_> {
    pub fn intrinsic(&self, index: u16) -> Option<&str> {
        self.intrinsics.get(index as usize).copied()
    }

    /// Callable name of an intrinsic: the signature without return type or parameters.
    pub fn intrinsic_name(&self, index: u16) -> String {
        match self.intrinsic(index) {
            Some(sig) => callable_name(sig).to_string(),
            None => format!("intrinsic_{:04X}", index),
        }
    }

    pub fn event_name(&self, index: u32) -> String {
        match self.events.get(index as usize) {
            Some(name) => name.to_string(),
            None => format!("event_{:02X}", index),
        }
    }
}

fn callable_name(sig: &str) -> &str {
    let head = sig.split('(').next().unwrap_or(sig);
    head.rsplit(' ').next().unwrap_or(head)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalName {
    pub offset: u32,
    pub size: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    globals: BTreeMap<u32, GlobalName>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, global: GlobalName) {
        self.globals.insert(global.offset, global);
    }

    pub fn find(&self, offset: u32) -> Option<&GlobalName> {
        self.globals.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Parses `offset size name` lines. Offsets are hex (an `0x` prefix is optional),
    /// sizes decimal. Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, DeucError> {
        let mut table = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = |reason: &str| DeucError::InvalidSymbol { line: idx + 1, reason: reason.to_string() };
            let mut parts = line.split_whitespace();
            let (Some(offset), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
                return Err(invalid("expected `offset size name`"));
            };
            if parts.next().is_some() {
                return Err(invalid("trailing fields"));
            }
            let digits = offset.trim_start_matches("0x").trim_start_matches("0X");
            let offset = u32::from_str_radix(digits, 16).map_err(|_| invalid("offset is not hex"))?;
            let size = size.parse::<u32>().map_err(|_| invalid("size is not a number"))?;
            table.insert(GlobalName { offset, size, name: name.to_string() });
        }
        Ok(table)
    }
}

pub const U8_INTRINSICS: &[&str] = &[
    // 0000
    "Item::touch()",
    "word Item::getX()",
    "word Item::getY()",
    "word Item::getZ()",
    "word Item::getCX()",
    "word Item::getCY()",
    "word Item::getCZ()",
    "Item::getPoint(WorldPoint*)",
    "uword Item::getShape()",
    "void Item::setShape(uword type)",
    "uword Item::getFrame()",
    "void Item::setFrame(uword frame)",
    "uword Item::getQuality()",
    "uword Item::getUnkEggType()",
    "uword Item::getQuantity()",
    "void Item::setQuantity(word value)",
    // 0010
    "Item::getContainer()",
    "Item::getRootContainer()",
    "Item::destroyContents()",
    "Item::destroy()",
    "uword Item::getQ()",
    "void Item::setQ(uword)",
    "void Item::setQuality(word value)",
    "Item::getContents()",
    "word Item::getFamily()",
    "bool Item::getTypeFlag(word bit)",
    "word Item::getStatus()",
    "void Item::orStatus(word mask)",
    "void Item::andStatus(word mask)",
    "Item::ascend(word)",
    "Item::getWeight()",
    "Item::getWeightIncludingContents()",
    // 0020
    "Item::getVolume()",
    "Item::getHeight()",
    "Item::getFamilyOfType()",
    "Item::legalCreateAtPoint()",
    "Item::legalCreateAtCoords()",
    "Item::legalCreateInCont()",
    "Item::create(uword, uword)",
    "Item::pop(uword, uword, ubyte)",
    "Item::popToCoords()",
    "Item::popToContainer()",
    "Item::popToEnd(uword)",
    "Item::move(uword, uword, ubyte)",
    "Item::legalMoveToPoint()",
    "Item::legalMoveToContainer()",
    "Item::legalMoveToParent()",
    "Item::getEtherealTop()",
    // 0030
    "Item::doFormatCollision()",
    "Item::moveToEtherealVoid()",
    "Item::moveToFromEtherealVoid()",
    "Item::isOnScreen()",
    "Item::getZTop()",
    "Item::hasFlags()",
    "Item::getFlags()",
    "Item::setFlag()",
    "Item::clearFlag()",
    "Item::getMapArray()",
    "Item::receiveHit(uword, byte, word, uword)",
    "Item::explode()",
    "Item::canReach(uword, word)",
    "Item::getRange(uword)",
    "Item::getRange2(uword, uword, uword)",
    "Item::getDirToCoords(uword, uword)",
    // 0040
    "Item::getDirFromCoords(uword, uword)",
    "Item::getDirToItem(uword)",
    "Item::getDirFromItem(uword)",
    "Item::getDirFromTo()",
    "Item::setFrameRotateClockwise()",
    "Item::setFrameRotateAntiClockwise()",
    "Item::isMouseDownEvent()",
    "word Item::getSliderInput(word min, word max, word step)",
    "Item::openGump(word)",
    "Item::closeGump()",
    "Item::getSliderValue()",
    "Item::setSliderValue()",
    "Item::setSliderShape()",
    "Item::sliderSetGumpShape()",
    "Item::getNpcNum()",
    "Item::getOwner()",
    // 0050
    "Item::getOwnerObjId()",
    "Item::getMapNum()",
    "Item::isOnMap()",
    "Item::getAttrFlags()",
    "Item::getTalkRange()",
    "Item::setNpcNum()",
    "Item::addTargetObjectId()",
    "Item::removeTargetObjectId()",
    "Item::clearTargetObjectIds()",
    "Item::addTargetMapId()",
    "Item::removeTargetMapId()",
    "Item::clearTargetMapIds()",
    "Item::resetRangedTargetTimer()",
    "Item::setMapNum()",
    "Item::setAttrFlags()",
    "Item::setTalkRange()",
    // 0060
    "Item::getTalkRangeTimer()",
    "Item::isObjIdTarget()",
    "Item::isMapIdTarget()",
    "Actor::isDead()",
    "Actor::getMap()",
    "Actor::getNpcNum()",
    "Actor::getLastActivityNo()",
    "Actor::getAlignment()",
    "Actor::setLastActivityNo()",
    "Actor::setAlignment()",
    "Actor::setTarget()",
    "Actor::setMap()",
    "Actor::getTarget()",
    "Actor::getMapNum()",
    "Actor::createActor()",
    "Actor::setStats()",
    // 0070
    "Actor::getHp()",
    "Actor::setHp()",
    "Actor::getMana()",
    "Actor::setMana()",
    "Actor::getStr()",
    "Actor::setStr()",
    "Actor::getDex()",
    "Actor::setDex()",
    "Actor::getInt()",
    "Actor::setInt()",
    "Actor::getMaxHp()",
    "Actor::getMaxMana()",
    "Actor::getArmorClass()",
    "Actor::isOnScreen()",
    "Actor::createActorFast()",
    "Actor::schedule()",
    // 0080
    "Actor::clownAttack()",
    "MusicProcess::playMusic()",
    "MusicProcess::queueMusic()",
    "MusicProcess::unqueueMusic()",
    "MusicProcess::restoreMusic()",
    "MusicProcess::getNextEggMusicTrack()",
    "MusicProcess::playCombatMusic()",
    "MusicProcess::isPlayingCombatMusic()",
    "MusicProcess::setEggMusic()",
    "Egg::reset()",
    "Egg::getEggId()",
    "Egg::setEggId(uword)",
    "Egg::getEggXRange()",
    "Egg::getEggYRange()",
    "Egg::setEggXRange(uword)",
    "Egg::setEggYRange(uword)",
    // 0090
    "CameraProcess::getCameraX()",
    "CameraProcess::getCameraY()",
    "CameraProcess::getCameraZ()",
    "CameraProcess::setCameraY()",
    "CameraProcess::setEarthquake()",
    "CameraProcess::getEarthquake()",
    "CameraProcess::setCenterOn()",
    "CameraProcess::move_to()",
    "CameraProcess::scrollTo()",
    "CameraProcess::bark()",
    "TeleportEgg::teleport()",
    "Actor::getLastAnimFrame()",
    "Actor::doAnim()",
    "Actor::getDir()",
    "Actor::getLastAnim()",
    "Actor::setDead()",
    // 00A0
    "Actor::getMaxEnergy()",
    "Actor::setMaxEnergy()",
    "Actor::getEnergy()",
    "Actor::setEnergy()",
    "Actor::getMaxStr()",
    "Actor::setMaxStr()",
    "Actor::getImmortal()",
    "Actor::setImmortal()",
    "Actor::getName()",
    "Actor::setName()",
    "Actor::getFlag()",
    "Actor::setFlag()",
    "Actor::clearFlag()",
    "Actor::getInventoryShape()",
    "Actor::setInventoryShape()",
    "Actor::getShield()",
    // 00B0
    "Actor::setShield()",
    "Actor::getMaxDex()",
    "Actor::setMaxDex()",
    "Actor::getMaxInt()",
    "Actor::setMaxInt()",
    "Actor::getImmortal()",
    "Actor::setImmortal()",
    "Actor::getActiveWeapon()",
    "Actor::setActiveWeapon()",
    "Actor::createTimer()",
    "Actor::getXRange()",
    "Actor::getYRange()",
    "Actor::setXRange()",
    "Actor::setYRange()",
    "Actor::getDir()",
    "Actor::getMap()",
    // 00C0
    "Actor::getAlignment()",
    "Actor::setAlignment()",
    "Actor::getEnemyAlignment()",
    "Actor::setEnemyAlignment()",
    "Actor::isEnemyAligned()",
    "Actor::isInParty()",
    "Actor::getLastActivity()",
    "Actor::setLastActivity()",
    "Actor::setInAction()",
    "Actor::setAirWalkEnabled()",
    "Actor::schedule()",
    "Actor::doAnimNo()",
    "Actor::getDirFacing()",
    "Actor::getEquip()",
    "Actor::setEquip()",
    "Actor::getDefaultActivity()",
    // 00D0
    "Actor::setDefaultActivity()",
    "Actor::setHomePosition()",
    "Actor::isKneeling()",
    "Actor::doAnim()",
    "Actor::isDead()",
    "Actor::setActivity()",
    "Actor::getLastAnimFrame()",
    "Actor::getAlignment()",
    "Actor::setAlignment()",
    "Actor::getNpcNum()",
    "Actor::setNpcNum()",
    "Actor::setAirWalkEnabled()",
    "Actor::getMaxEnergy()",
    "Actor::getEnergy()",
    "Actor::setEnergy()",
    "Actor::getMana()",
    // 00E0
    "Actor::setMana()",
    "Actor::getStr()",
    "Actor::setStr()",
    "Actor::getDex()",
    "Actor::setDex()",
    "Actor::getInt()",
    "Actor::setInt()",
    "Actor::getMaxHp()",
    "Actor::getHp()",
    "Actor::setHp()",
    "Actor::getName()",
    "Actor::setName()",
    "Actor::getFlag()",
    "Actor::setFlag()",
    "Actor::clearFlag()",
    "Actor::teleport()",
    // 00F0
    "Actor::getMaxDex()",
    "Actor::setMaxDex()",
    "Actor::getMaxInt()",
    "Actor::setMaxInt()",
    "Actor::getMaxStr()",
    "Actor::setMaxStr()",
    "Actor::setTarget()",
    "Actor::getTarget()",
    "Actor::isInCombat()",
    "Actor::setInCombat()",
    "Actor::terminateCombat()",
    "Actor::isEnemy()",
    "Actor::setEnemy()",
    "Actor::clearEnemy()",
    "Actor::setInAction()",
    "Actor::setLastActivity()",
    // 0100
    "Actor::setImmortal()",
];

pub const U8_EVENTS: &[&str] = &[
    "look()",
    "use()",
    "anim()",
    "setActivity()",
    "cachein()",
    "hit(uword, word)",
    "gotHit(uword, word)",
    "hatch()",
    "schedule()",
    "release()",
    "equip()",
    "unequip()",
    "combine()",
    "func0D",
    "calledFromAnim()",
    "enterFastArea()",
    "leaveFastArea()",
    "cast(uword)",
    "justMoved()",
    "AvatarStoleSomething(uword)",
    "animGetHit()",
    "guardianBark(word)",
    "func16",
    "func17",
    "func18",
    "func19",
    "func1A",
    "func1B",
    "func1C",
    "func1D",
    "func1E",
    "func1F",
];
