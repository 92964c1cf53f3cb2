//! Parsers for gluster, gluster-block and LVM command output.

use serde::Deserialize;

/// Summary of `gluster volume info --xml` for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub id: String,
    pub status: String,
    pub type_str: String,
    pub brick_count: usize,
    /// Bricks as `host:path`, in volume order
    pub bricks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CliOutput {
    #[serde(rename = "opRet")]
    op_ret: i32,
    #[serde(rename = "opErrstr", default)]
    op_errstr: Option<String>,
    #[serde(rename = "volInfo")]
    vol_info: Option<VolInfoXml>,
    #[serde(rename = "snapList")]
    snap_list: Option<SnapListXml>,
    #[serde(rename = "snapInfo")]
    snap_info: Option<SnapInfoXml>,
    #[serde(rename = "healInfo")]
    heal_info: Option<HealInfoXml>,
}

#[derive(Debug, Deserialize)]
struct VolInfoXml {
    volumes: VolumesXml,
}

#[derive(Debug, Deserialize)]
struct VolumesXml {
    #[serde(default)]
    volume: Vec<VolumeXml>,
}

#[derive(Debug, Deserialize)]
struct VolumeXml {
    name: String,
    id: String,
    #[serde(rename = "statusStr")]
    status_str: String,
    #[serde(rename = "typeStr", default)]
    type_str: String,
    #[serde(rename = "brickCount")]
    brick_count: usize,
    #[serde(default)]
    bricks: Option<VolBricksXml>,
}

#[derive(Debug, Deserialize)]
struct VolBricksXml {
    #[serde(default)]
    brick: Vec<VolBrickXml>,
}

#[derive(Debug, Deserialize)]
struct VolBrickXml {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SnapListXml {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct SnapInfoXml {
    snapshots: SnapshotsXml,
}

#[derive(Debug, Deserialize)]
struct SnapshotsXml {
    #[serde(default)]
    snapshot: Vec<SnapshotXml>,
}

#[derive(Debug, Deserialize)]
struct SnapshotXml {
    name: String,
    uuid: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "createTime", default)]
    create_time: String,
    #[serde(rename = "snapVolume")]
    snap_volume: Option<SnapVolumeXml>,
}

#[derive(Debug, Deserialize)]
struct SnapVolumeXml {
    #[serde(default)]
    status: String,
    #[serde(rename = "originVolume")]
    origin_volume: Option<OriginVolumeXml>,
}

#[derive(Debug, Deserialize)]
struct OriginVolumeXml {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HealInfoXml {
    bricks: HealBricksXml,
}

#[derive(Debug, Deserialize)]
struct HealBricksXml {
    #[serde(default)]
    brick: Vec<HealBrickXml>,
}

#[derive(Debug, Deserialize)]
struct HealBrickXml {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "numberOfEntries", default)]
    number_of_entries: String,
}

fn parse_cli(xml: &str) -> Result<CliOutput, String> {
    let out: CliOutput = quick_xml::de::from_str(xml).map_err(|e| e.to_string())?;
    if out.op_ret != 0 {
        return Err(out
            .op_errstr
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("gluster returned {}", out.op_ret)));
    }
    Ok(out)
}

/// Parse `gluster volume info <name> --xml`
pub fn parse_volume_info(xml: &str) -> Result<VolumeInfo, String> {
    let out = parse_cli(xml)?;
    let volume = out
        .vol_info
        .and_then(|info| info.volumes.volume.into_iter().next())
        .ok_or_else(|| "no volume in output".to_string())?;
    Ok(VolumeInfo {
        name: volume.name,
        id: volume.id,
        status: volume.status_str,
        type_str: volume.type_str,
        brick_count: volume.brick_count,
        bricks: volume
            .bricks
            .map(|b| b.brick.into_iter().map(|brick| brick.name).collect())
            .unwrap_or_default(),
    })
}

/// Parse `gluster snapshot list <name> --xml` into the snapshot count
pub fn parse_snapshot_count(xml: &str) -> Result<usize, String> {
    let out = parse_cli(xml)?;
    Ok(out.snap_list.map_or(0, |s| s.count))
}

/// Check the status of any `gluster ... --xml` command
pub fn parse_cli_status(xml: &str) -> Result<(), String> {
    parse_cli(xml).map(|_| ())
}

/// One snapshot from `gluster snapshot info <name> --xml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub uuid: String,
    pub description: String,
    pub create_time: String,
    /// Snapshot volume status, `Started` once activated
    pub status: String,
    pub origin_volume: String,
}

/// Parse `gluster snapshot info <name> --xml`
pub fn parse_snapshot_info(xml: &str) -> Result<SnapshotInfo, String> {
    let out = parse_cli(xml)?;
    let snapshot = out
        .snap_info
        .and_then(|info| info.snapshots.snapshot.into_iter().next())
        .ok_or_else(|| "no snapshot in output".to_string())?;
    let (status, origin_volume) = snapshot.snap_volume.map_or_else(Default::default, |v| {
        (v.status, v.origin_volume.map(|o| o.name).unwrap_or_default())
    });
    Ok(SnapshotInfo {
        name: snapshot.name,
        uuid: snapshot.uuid,
        description: snapshot.description,
        create_time: snapshot.create_time,
        status,
        origin_volume,
    })
}

/// Self-heal state of one brick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickHealStatus {
    pub name: String,
    pub status: String,
    /// Entries waiting for heal; unknown while the brick is disconnected
    pub entries: Option<u64>,
}

/// Parse `gluster volume heal <name> info --xml`
pub fn parse_heal_info(xml: &str) -> Result<Vec<BrickHealStatus>, String> {
    let out = parse_cli(xml)?;
    let bricks = out.heal_info.map(|h| h.bricks.brick).unwrap_or_default();
    Ok(bricks
        .into_iter()
        .map(|b| BrickHealStatus {
            entries: b.number_of_entries.trim().parse().ok(),
            name: b.name,
            status: b.status,
        })
        .collect())
}

/// Physical extent size and free space of a volume group, in KB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub size_kb: u64,
    pub extent_size_kb: u64,
}

/// Parse `vgdisplay -c <vg>`
pub fn parse_vgdisplay(output: &str) -> Result<DeviceInfo, String> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| "empty vgdisplay output".to_string())?;
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 16 {
        return Err(format!("unexpected vgdisplay output: {line}"));
    }
    let field = |i: usize| -> Result<u64, String> {
        fields[i]
            .parse::<u64>()
            .map_err(|e| format!("bad vgdisplay field {i} ({}): {e}", fields[i]))
    };
    let extent_size_kb = field(12)?;
    let free_extents = field(15)?;
    Ok(DeviceInfo {
        size_kb: free_extents * extent_size_kb,
        extent_size_kb,
    })
}

/// Result of `gluster-block create --json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockVolumeInfo {
    pub iqn: String,
    pub username: String,
    pub password: String,
    pub portals: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BlockCreateJson {
    #[serde(rename = "IQN", default)]
    iqn: String,
    #[serde(rename = "USERNAME", default)]
    username: String,
    #[serde(rename = "PASSWORD", default)]
    password: String,
    #[serde(rename = "PORTAL(S)", default)]
    portals: Vec<String>,
    #[serde(rename = "RESULT", default)]
    result: String,
    #[serde(rename = "errMsg", default)]
    err_msg: String,
}

/// Parse `gluster-block create ... --json`
pub fn parse_block_create(output: &str) -> Result<BlockVolumeInfo, String> {
    let json: BlockCreateJson = serde_json::from_str(output.trim()).map_err(|e| e.to_string())?;
    if !json.result.is_empty() && json.result != "SUCCESS" {
        return Err(if json.err_msg.is_empty() {
            format!("gluster-block result {}", json.result)
        } else {
            json.err_msg
        });
    }
    Ok(BlockVolumeInfo {
        iqn: json.iqn,
        username: json.username,
        password: json.password,
        portals: json.portals,
    })
}

#[derive(Debug, Deserialize)]
struct BlockResultJson {
    #[serde(rename = "RESULT", default)]
    result: String,
    #[serde(rename = "errMsg", default)]
    err_msg: String,
}

/// Parse the result of `gluster-block modify ... --json`
pub fn parse_block_modify(output: &str) -> Result<(), String> {
    let json: BlockResultJson = serde_json::from_str(output.trim()).map_err(|e| e.to_string())?;
    if json.result == "SUCCESS" {
        Ok(())
    } else if json.err_msg.is_empty() {
        Err(format!("gluster-block result {:?}", json.result))
    } else {
        Err(json.err_msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOLUME_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cliOutput>
  <opRet>0</opRet>
  <opErrno>0</opErrno>
  <opErrstr/>
  <volInfo>
    <volumes>
      <volume>
        <name>vol1</name>
        <id>6b60c53c-8ce0-4d8d-a42c-5b546bca3d09</id>
        <status>1</status>
        <statusStr>Started</statusStr>
        <brickCount>6</brickCount>
        <distCount>3</distCount>
        <replicaCount>3</replicaCount>
        <typeStr>Distributed-Replicate</typeStr>
        <bricks>
          <brick uuid="a1">h1:/b/1<name>h1:/b/1</name><hostUuid>a1</hostUuid></brick>
        </bricks>
        <optCount>0</optCount>
      </volume>
      <count>1</count>
    </volumes>
  </volInfo>
</cliOutput>"#;

    #[test]
    fn test_parse_volume_info() {
        let info = parse_volume_info(VOLUME_INFO).unwrap();
        assert_eq!(info.name, "vol1");
        assert_eq!(info.status, "Started");
        assert_eq!(info.brick_count, 6);
        assert_eq!(info.type_str, "Distributed-Replicate");
        assert_eq!(info.bricks, vec!["h1:/b/1".to_string()]);
    }

    #[test]
    fn test_parse_failed_cli_output() {
        let xml = "<cliOutput><opRet>-1</opRet><opErrno>2</opErrno><opErrstr>Volume v does not exist</opErrstr></cliOutput>";
        let err = parse_volume_info(xml).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_parse_snapshot_count() {
        let xml = "<cliOutput><opRet>0</opRet><opErrno>0</opErrno><opErrstr/><snapList><count>2</count><snapshot>s1</snapshot><snapshot>s2</snapshot></snapList></cliOutput>";
        assert_eq!(parse_snapshot_count(xml).unwrap(), 2);
        let xml = "<cliOutput><opRet>0</opRet><opErrno>0</opErrno><opErrstr/><snapList><count>0</count></snapList></cliOutput>";
        assert_eq!(parse_snapshot_count(xml).unwrap(), 0);
    }

    #[test]
    fn test_parse_vgdisplay() {
        let out = "  vg_abc:r/w:772:-1:0:0:0:-1:0:1:1:104853504:4096:25599:0:25599:Ge3bSi-vMhF\n";
        let info = parse_vgdisplay(out).unwrap();
        assert_eq!(info.extent_size_kb, 4096);
        assert_eq!(info.size_kb, 25599 * 4096);
        assert!(parse_vgdisplay("garbage").is_err());
    }

    #[test]
    fn test_parse_block_create() {
        let out = r#"{ "IQN": "iqn.2016-12.org.gluster-block:abc", "USERNAME": "u", "PASSWORD": "p", "PORTAL(S)": [ "10.0.0.1:3260", "10.0.0.2:3260" ], "RESULT": "SUCCESS" }"#;
        let info = parse_block_create(out).unwrap();
        assert_eq!(info.iqn, "iqn.2016-12.org.gluster-block:abc");
        assert_eq!(info.portals.len(), 2);

        let out = r#"{ "RESULT": "FAIL", "errMsg": "no space" }"#;
        assert_eq!(parse_block_create(out).unwrap_err(), "no space");
    }

    #[test]
    fn test_parse_snapshot_info() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cliOutput>
  <opRet>0</opRet>
  <opErrno>0</opErrno>
  <opErrstr/>
  <snapInfo>
    <count>1</count>
    <snapshots>
      <snapshot>
        <name>snap1</name>
        <uuid>0b3ea2ef-3a2b-4ff1-9c6b-6ad0f1d2e6a9</uuid>
        <description>nightly</description>
        <createTime>2024-05-01 10:00:00</createTime>
        <volCount>1</volCount>
        <snapVolume>
          <name>b2f1c8d7a0e94d3e8f4f0b3ea2ef3a2b</name>
          <status>Stopped</status>
          <originVolume>
            <name>vol1</name>
            <snapCount>1</snapCount>
            <snapRemaining>255</snapRemaining>
          </originVolume>
        </snapVolume>
      </snapshot>
    </snapshots>
  </snapInfo>
</cliOutput>"#;
        let info = parse_snapshot_info(xml).unwrap();
        assert_eq!(info.name, "snap1");
        assert_eq!(info.description, "nightly");
        assert_eq!(info.status, "Stopped");
        assert_eq!(info.origin_volume, "vol1");

        let missing = "<cliOutput><opRet>-1</opRet><opErrno>30806</opErrno><opErrstr>Snapshot (snap9) does not exist</opErrstr></cliOutput>";
        assert!(parse_snapshot_info(missing).unwrap_err().contains("does not exist"));
    }

    #[test]
    fn test_parse_heal_info() {
        let xml = r#"<cliOutput>
  <healInfo>
    <bricks>
      <brick hostUuid="a1"><name>s0:/b/1</name><status>Connected</status><numberOfEntries>0</numberOfEntries></brick>
      <brick hostUuid="a2"><name>s1:/b/2</name><status>Connected</status><numberOfEntries>12</numberOfEntries></brick>
      <brick hostUuid="-"><name>s2:/b/3</name><status>Transport endpoint is not connected</status><numberOfEntries>-</numberOfEntries></brick>
    </bricks>
  </healInfo>
  <opRet>0</opRet>
  <opErrno>0</opErrno>
  <opErrstr/>
</cliOutput>"#;
        let bricks = parse_heal_info(xml).unwrap();
        assert_eq!(bricks.len(), 3);
        assert_eq!(bricks[1].name, "s1:/b/2");
        assert_eq!(bricks[1].entries, Some(12));
        assert_eq!(bricks[2].entries, None);
        assert!(parse_cli_status("<cliOutput><opRet>0</opRet></cliOutput>").is_ok());
    }

    #[test]
    fn test_parse_block_modify() {
        let out = r#"{ "IQN": "iqn.2016-12.org.gluster-block:abc", "SIZE": "10.0 GiB", "SUCCESSFUL ON": [ "10.0.0.1" ], "RESULT": "SUCCESS" }"#;
        assert!(parse_block_modify(out).is_ok());
        let out = r#"{ "RESULT": "FAIL", "errCode": 22, "errMsg": "size should be greater than current size" }"#;
        assert!(parse_block_modify(out).unwrap_err().contains("greater than"));
        assert!(parse_block_modify("").is_err());
    }
}
